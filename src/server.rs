use axum::{Router, middleware, routing::get};
use std::sync::Arc;

use crate::handlers::{health_handler, metrics_handler, proxy_handler};
use crate::state::AppState;
use crate::tracking::track_requests;

/// Gateway router: `/health` and `/metrics` are served locally and untracked,
/// everything else is tracked and forwarded upstream.
pub fn create_router(state: Arc<AppState>) -> Router {
    let tracked = Router::new()
        .fallback(proxy_handler)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.tracker),
            track_requests,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(tracked)
        .with_state(state)
}

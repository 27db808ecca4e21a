use std::sync::Arc;
use crate::tracking::Tracker;

// gateway's shared state
pub struct AppState {
    pub client: reqwest::Client,
    pub upstream: String, // base url of the fronted service, no trailing slash
    pub tracker: Arc<Tracker>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        client: reqwest::Client,
        upstream: &str,
        tracker: Arc<Tracker>,
        max_body_bytes: usize,
    ) -> Self {
        // add http:// if not present
        let upstream = if upstream.starts_with("http") {
            upstream.to_string()
        } else {
            format!("http://{}", upstream)
        };
        Self {
            client,
            upstream: upstream.trim_end_matches('/').to_string(),
            tracker,
            max_body_bytes,
        }
    }
}

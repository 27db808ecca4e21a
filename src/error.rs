use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors produced by the tracking layer and the gateway.
///
/// Tracking itself never turns one of these into a failed request. Delivery
/// errors are logged and dropped by the collector, config errors surface at
/// startup, and only the gateway's proxy answers with [`TrackerError::Upstream`].
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid rate limit config: {0}")]
    InvalidConfig(String),

    #[error("delivery to collector failed: {0}")]
    Delivery(#[from] reqwest::Error),

    #[error("collector rejected record with status {0}")]
    Rejected(StatusCode),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let status = match &self {
            TrackerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!(error = %self, "request failed");
        (status, self.to_string()).into_response()
    }
}

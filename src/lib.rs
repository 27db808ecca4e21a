//! Request tracking for HTTP services.
//!
//! [`tracking::track_requests`] is an axum middleware that, for every request,
//! records it against a per-service fixed-window [`rate_limit::RateLimiter`]
//! (without ever rejecting it), measures latency and body sizes, and hands an
//! [`models::ApiLogRecord`] to a [`collector::CollectorClient`] which ships it
//! to a remote collector in the background.
//!
//! The `api-tracker` binary runs the middleware in front of an upstream
//! service as a reverse proxy.

pub mod collector;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod server;
pub mod state;
pub mod tracking;

pub use collector::CollectorClient;
pub use config::{CollectorConfig, RateLimitConfig, RouteConfig};
pub use error::{Result, TrackerError};
pub use models::ApiLogRecord;
pub use rate_limit::{RateLimiter, RateLimiterRegistry, WindowCounter};
pub use tracking::{RequestContext, Tracker, track_requests};

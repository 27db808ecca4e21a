//! Request tracking middleware.
//!
//! Every request goes through two observation points:
//!
//! * STARTED: the start time is taken and the service's [`RateLimiter`] is
//!   asked whether this request is over budget. The answer is only kept, the
//!   request always proceeds.
//! * COMPLETED: latency and body sizes are measured and one [`ApiLogRecord`]
//!   is handed to the [`CollectorClient`].
//!
//! Both live on a [`RequestContext`] owned by the middleware future. If that
//! future is dropped before the response is produced (timeout, client gone,
//! handler panic) the context still emits its record from `Drop`, with
//! status [`ABORTED_STATUS`].
//!
//! Measuring never changes what the handler or the client sees. A request
//! body without a known length is wrapped in a stream that counts bytes as
//! the handler reads them; a response body without a known length counts
//! as 0.
//!
//! ```rust,ignore
//! let tracker = Arc::new(Tracker::new("notes", limiter, collector));
//! let app = Router::new()
//!     .route("/api/notes", get(list_notes))
//!     .layer(axum::middleware::from_fn_with_state(tracker, track_requests));
//! ```

use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio_stream::StreamExt;

use crate::collector::CollectorClient;
use crate::metrics::{RATE_LIMIT_HITS, REQUEST_LATENCY, TRACKED_REQUESTS};
use crate::models::ApiLogRecord;
use crate::rate_limit::{RateLimiter, RateLimiterRegistry};

/// Status recorded for requests whose future was dropped before completion.
pub const ABORTED_STATUS: u16 = 499;

// A service identity and the limiter that accounts for it
#[derive(Clone)]
struct Service {
    name: String,
    limiter: Arc<RateLimiter>,
}

struct Route {
    prefix: String,
    service: Service,
}

impl Route {
    // "/api/notes" matches "/api/notes" and "/api/notes/1", not "/api/notesx"
    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.prefix.ends_with('/'),
            None => false,
        }
    }
}

/// Tracking state shared by all requests.
///
/// Requests are attributed to the default service unless their path falls
/// under a route added with [`Tracker::with_route`]; the longest matching
/// prefix wins.
pub struct Tracker {
    default_service: Service,
    routes: Vec<Route>,
    collector: CollectorClient,
}

impl Tracker {
    pub fn new(
        service_name: impl Into<String>,
        limiter: Arc<RateLimiter>,
        collector: CollectorClient,
    ) -> Self {
        Self {
            default_service: Service {
                name: service_name.into(),
                limiter,
            },
            routes: Vec::new(),
            collector,
        }
    }

    /// Tracker for `service_name` using whatever limit the registry holds for it.
    pub fn from_registry(
        service_name: &str,
        registry: &RateLimiterRegistry,
        collector: CollectorClient,
    ) -> Self {
        Self::new(service_name, registry.limiter_for(service_name), collector)
    }

    /// Attributes requests under `prefix` to another service.
    pub fn with_route(
        mut self,
        prefix: impl Into<String>,
        service_name: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        self.routes.push(Route {
            prefix: prefix.into(),
            service: Service {
                name: service_name.into(),
                limiter,
            },
        });
        self.routes.sort_by_key(|route| Reverse(route.prefix.len()));
        self
    }

    pub fn service_name(&self) -> &str {
        &self.default_service.name
    }

    /// Name of the service a request to `path` is attributed to.
    pub fn service_for(&self, path: &str) -> &str {
        &self.resolve(path).name
    }

    fn resolve(&self, path: &str) -> &Service {
        self.routes
            .iter()
            .find(|route| route.matches(path))
            .map(|route| &route.service)
            .unwrap_or(&self.default_service)
    }
}

// Taken at STARTED, consumed at COMPLETED
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    pub started: Instant,
    pub timestamp: DateTime<Utc>,
    pub rate_limit_hit: bool,
}

/// Tracking state of one request, threaded from STARTED to COMPLETED.
pub struct RequestContext {
    tracker: Arc<Tracker>,
    service: Service,
    method: String,
    endpoint: String,
    request_bytes: Arc<AtomicU64>,
    metrics: Option<RequestMetrics>,
}

impl RequestContext {
    pub fn new(
        tracker: Arc<Tracker>,
        method: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into();
        let service = tracker.resolve(&endpoint).clone();
        Self {
            tracker,
            service,
            method: method.into(),
            endpoint,
            request_bytes: Arc::new(AtomicU64::new(0)),
            metrics: None,
        }
    }

    /// STARTED. Records the request against the limiter and returns the
    /// over-limit flag. Never blocks or rejects.
    pub fn on_start(&mut self) -> bool {
        let started = Instant::now();
        let rate_limit_hit = self.service.limiter.check_and_record();

        TRACKED_REQUESTS.inc();
        if rate_limit_hit {
            RATE_LIMIT_HITS.inc();
            tracing::warn!(
                service = %self.service.name,
                endpoint = %self.endpoint,
                "rate limit hit"
            );
        }

        self.metrics = Some(RequestMetrics {
            started,
            timestamp: Utc::now(),
            rate_limit_hit,
        });
        rate_limit_hit
    }

    pub fn rate_limit_hit(&self) -> Option<bool> {
        self.metrics.as_ref().map(|m| m.rate_limit_hit)
    }

    pub fn set_request_size(&self, bytes: u64) {
        self.request_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Wraps `body` so every data frame the handler reads is added to the
    /// request size. The bytes themselves pass through unchanged.
    pub fn count_request_body(&self, body: Body) -> Body {
        let counter = Arc::clone(&self.request_bytes);
        Body::from_stream(body.into_data_stream().map(move |frame| {
            if let Ok(chunk) = &frame {
                counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            }
            frame
        }))
    }

    /// COMPLETED. Ships the record; a no-op if STARTED never ran.
    pub fn on_complete(mut self, status_code: u16, response_size: u64) {
        self.finish(status_code, response_size);
    }

    fn finish(&mut self, status_code: u16, response_size: u64) {
        let Some(metrics) = self.metrics.take() else {
            return;
        };

        let elapsed = metrics.started.elapsed();
        REQUEST_LATENCY.observe(elapsed.as_secs_f64());

        let record = ApiLogRecord {
            service_name: self.service.name.clone(),
            endpoint: std::mem::take(&mut self.endpoint),
            method: std::mem::take(&mut self.method),
            status_code,
            latency_ms: elapsed.as_millis() as u64,
            request_size: self.request_bytes.load(Ordering::Relaxed),
            response_size,
            timestamp: metrics.timestamp,
            rate_limit_hit: metrics.rate_limit_hit,
        };
        tracing::debug!(
            endpoint = %record.endpoint,
            status = record.status_code,
            latency_ms = record.latency_ms,
            "request completed"
        );
        self.tracker.collector.send(record);
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if self.metrics.is_some() {
            tracing::debug!(endpoint = %self.endpoint, "request aborted before completion");
            self.finish(ABORTED_STATUS, 0);
        }
    }
}

/// axum middleware; install with `axum::middleware::from_fn_with_state`.
pub async fn track_requests(
    State(tracker): State<Arc<Tracker>>,
    req: Request,
    next: Next,
) -> Response {
    let mut ctx = RequestContext::new(tracker, req.method().as_str(), req.uri().path());
    ctx.on_start();

    let (parts, body) = req.into_parts();
    let body = match body.size_hint().exact() {
        Some(size) => {
            ctx.set_request_size(size);
            body
        }
        None => ctx.count_request_body(body),
    };

    let response = next.run(Request::from_parts(parts, body)).await;
    let response_size = response.body().size_hint().exact().unwrap_or(0);
    ctx.on_complete(response.status().as_u16(), response_size);
    response
}

use lazy_static::lazy_static;
use prometheus::{Counter, Histogram, register_counter, register_histogram};

// Registration only fails on a duplicate name, which is a programming error.
lazy_static! {
    pub static ref TRACKED_REQUESTS: Counter =
        register_counter!("tracker_requests_total", "Total number of tracked requests").unwrap();
    pub static ref RATE_LIMIT_HITS: Counter = register_counter!(
        "tracker_rate_limit_hits_total",
        "Requests observed over their window limit"
    )
    .unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "tracker_request_latency_seconds",
        "Tracked request latency in seconds"
    )
    .unwrap();
    pub static ref RECORDS_ENQUEUED: Counter = register_counter!(
        "tracker_records_enqueued_total",
        "Log records queued for delivery"
    )
    .unwrap();
    pub static ref RECORDS_DROPPED: Counter = register_counter!(
        "tracker_records_dropped_total",
        "Log records dropped because the queue was full or closed"
    )
    .unwrap();
    pub static ref RECORDS_DELIVERED: Counter = register_counter!(
        "tracker_records_delivered_total",
        "Log records accepted by the collector"
    )
    .unwrap();
    pub static ref DELIVERY_FAILURES: Counter = register_counter!(
        "tracker_delivery_failures_total",
        "Log records lost to delivery errors"
    )
    .unwrap();
}

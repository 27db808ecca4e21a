//! Best-effort shipping of log records to the collector.
//!
//! `send` only ever does a `try_send` on a bounded queue. A dispatcher task
//! drains the queue and runs deliveries concurrently, capped by a semaphore.
//! A full queue drops the newest record. Failed deliveries are logged and
//! dropped, never retried. Once every client handle is dropped the
//! dispatcher waits for in-flight deliveries and exits.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::CollectorConfig;
use crate::error::{Result, TrackerError};
use crate::metrics::{
    DELIVERY_FAILURES, RECORDS_DELIVERED, RECORDS_DROPPED, RECORDS_ENQUEUED,
};
use crate::models::ApiLogRecord;

#[derive(Clone)]
pub struct CollectorClient {
    tx: mpsc::Sender<ApiLogRecord>,
}

impl CollectorClient {
    /// Client plus the raw receiving end of its queue, for callers that want
    /// to consume records themselves.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ApiLogRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Client whose records are POSTed to `config.url` by a background
    /// dispatcher. Must be called inside a tokio runtime.
    pub fn spawn(config: CollectorConfig, http: reqwest::Client) -> (Self, JoinHandle<()>) {
        let (client, rx) = Self::channel(config.queue_capacity);
        let handle = tokio::spawn(dispatch(rx, http, config));
        (client, handle)
    }

    /// Queues `record` for delivery. Never waits and never fails.
    pub fn send(&self, record: ApiLogRecord) {
        match self.tx.try_send(record) {
            Ok(()) => RECORDS_ENQUEUED.inc(),
            Err(TrySendError::Full(record)) => {
                RECORDS_DROPPED.inc();
                tracing::debug!(
                    endpoint = %record.endpoint,
                    "collector queue full, dropping log record"
                );
            }
            Err(TrySendError::Closed(record)) => {
                RECORDS_DROPPED.inc();
                tracing::warn!(
                    endpoint = %record.endpoint,
                    "collector dispatcher is gone, dropping log record"
                );
            }
        }
    }
}

// Drains the queue until every client handle is dropped
async fn dispatch(
    mut rx: mpsc::Receiver<ApiLogRecord>,
    http: reqwest::Client,
    config: CollectorConfig,
) {
    tracing::info!(
        url = %config.url,
        max_in_flight = config.max_in_flight,
        "collector dispatcher started"
    );

    let max_in_flight = config.max_in_flight.max(1);
    let permits = Arc::new(Semaphore::new(max_in_flight));
    let url: Arc<str> = Arc::from(config.url.as_str());

    while let Some(record) = rx.recv().await {
        // waiting here lets the bounded queue absorb bursts
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let http = http.clone();
        let url = Arc::clone(&url);
        let timeout = config.timeout;

        tokio::spawn(async move {
            let _permit = permit;
            match deliver(&http, &url, timeout, &record).await {
                Ok(()) => {
                    RECORDS_DELIVERED.inc();
                    tracing::debug!(endpoint = %record.endpoint, "log record delivered");
                }
                Err(e) => {
                    DELIVERY_FAILURES.inc();
                    tracing::warn!(
                        service = %record.service_name,
                        endpoint = %record.endpoint,
                        error = %e,
                        "failed to send log to collector"
                    );
                }
            }
        });
    }

    // all permits back means no delivery is still running
    let _ = permits.acquire_many(max_in_flight as u32).await;
    tracing::info!("collector dispatcher stopped");
}

pub async fn deliver(
    http: &reqwest::Client,
    url: &str,
    timeout: std::time::Duration,
    record: &ApiLogRecord,
) -> Result<()> {
    let res = http.post(url).timeout(timeout).json(record).send().await?;

    if !res.status().is_success() {
        return Err(TrackerError::Rejected(res.status()));
    }
    Ok(())
}

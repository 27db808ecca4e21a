//! Fixed-window request accounting, one limiter per service.
//!
//! Time is cut into windows of `window_duration_secs`; each window owns a
//! counter that starts at zero and only grows. A request is "over limit" once
//! the counter for its window passes the configured limit.
//!
//! This is an approximation of a rate: a burst straddling a window boundary
//! can see up to twice the nominal limit across the two windows. That is the
//! intended behavior.
//!
//! A caller whose clock reading lands in a window that has already been swept
//! is counted against the newest window instead, so a swept window is never
//! re-created. The watermark is read before the counter is fetched, so a
//! sweep that starts between the two can still remove a counter a caller is
//! about to bump; that request is then missing from the new window's count.
//!
//! The limiter never rejects anything. Callers use the answer as a flag.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::config::RateLimitConfig;

// Request counter for a single window
#[derive(Debug, Default)]
pub struct WindowCounter {
    count: AtomicU64,
}

impl WindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one request and returns the count including it.
    pub fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<i64, Arc<WindowCounter>>,
    // Windows below this id have already been evicted
    swept_below: AtomicI64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            swept_below: AtomicI64::new(i64::MIN),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Records a request in the current window and reports whether the
    /// window is now over its limit.
    pub fn check_and_record(&self) -> bool {
        self.check_and_record_at(Utc::now().timestamp_millis())
    }

    /// Same as [`check_and_record`](Self::check_and_record) with an explicit
    /// wall-clock time in epoch milliseconds.
    pub fn check_and_record_at(&self, now_ms: i64) -> bool {
        let window_id = self.evict_before(self.window_id(now_ms));
        let counter = self.counter_for(window_id);
        counter.increment() > self.config.limit
    }

    pub fn window_id(&self, now_ms: i64) -> i64 {
        now_ms.div_euclid(self.config.window_millis().max(1))
    }

    /// Requests counted so far in `window_id`, 0 if it is not tracked.
    pub fn count_in_window(&self, window_id: i64) -> u64 {
        self.windows
            .get(&window_id)
            .map(|counter| counter.count())
            .unwrap_or(0)
    }

    pub fn active_windows(&self) -> usize {
        self.windows.len()
    }

    fn counter_for(&self, window_id: i64) -> Arc<WindowCounter> {
        // read-locked fast path; the shard write lock is only taken for a new window
        if let Some(counter) = self.windows.get(&window_id) {
            return Arc::clone(counter.value());
        }
        let entry = self
            .windows
            .entry(window_id)
            .or_insert_with(|| Arc::new(WindowCounter::new()));
        Arc::clone(entry.value())
    }

    // Sweeps windows older than `window_id` and returns the window the caller
    // should count against, which is never one that was already swept.
    fn evict_before(&self, window_id: i64) -> i64 {
        let previous = self.swept_below.fetch_max(window_id, Ordering::AcqRel);
        if previous >= window_id {
            return previous;
        }
        self.windows.retain(|id, _| *id >= window_id);
        window_id
    }
}

/// Limiters keyed by service name.
///
/// Configs are fixed at construction. A service without one gets
/// [`RateLimitConfig::fallback`] limits on first use.
pub struct RateLimiterRegistry {
    configs: HashMap<String, RateLimitConfig>,
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new(configs: impl IntoIterator<Item = RateLimitConfig>) -> Self {
        let configs = configs
            .into_iter()
            .map(|cfg| (cfg.service_name.clone(), cfg))
            .collect();
        Self {
            configs,
            limiters: DashMap::new(),
        }
    }

    pub fn limiter_for(&self, service_name: &str) -> Arc<RateLimiter> {
        if let Some(limiter) = self.limiters.get(service_name) {
            return Arc::clone(limiter.value());
        }
        let entry = self
            .limiters
            .entry(service_name.to_string())
            .or_insert_with(|| {
                let config = match self.configs.get(service_name) {
                    Some(cfg) => cfg.clone(),
                    None => {
                        tracing::info!(
                            service = service_name,
                            "no rate limit configured, using defaults"
                        );
                        RateLimitConfig::fallback(service_name)
                    }
                };
                Arc::new(RateLimiter::new(config))
            });
        Arc::clone(entry.value())
    }

    pub fn check_and_record(&self, service_name: &str) -> bool {
        self.limiter_for(service_name).check_and_record()
    }
}

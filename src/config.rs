use clap::Parser;
use std::str::FromStr;
use std::time::Duration;

use crate::error::TrackerError;

pub const DEFAULT_SERVICE_NAME: &str = "default-service";
pub const DEFAULT_LIMIT: u64 = 100;
pub const DEFAULT_WINDOW_SECS: u64 = 1;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "api-tracker")]
#[command(about = "Request tracking gateway with per-service rate accounting")]
pub struct Args {
    // Port to run the gateway on
    #[arg(short, long, default_value_t = 8081)]
    pub port: u16,

    // Service being fronted; every non-internal request is forwarded here
    #[arg(short, long, default_value = "http://localhost:8080")]
    pub upstream: String,

    // Identity used for limiter keying and log tagging
    #[arg(short, long, default_value = DEFAULT_SERVICE_NAME)]
    pub service_name: String,

    // Rate limit max requests per window
    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    pub rate_limit: u64,

    // Rate limit window in seconds
    #[arg(long, default_value_t = DEFAULT_WINDOW_SECS)]
    pub rate_window: u64,

    // Extra per-service limits, e.g. "notes=50/1" (repeatable)
    #[arg(long = "service-limit")]
    pub service_limits: Vec<RateLimitConfig>,

    // Path prefix attributed to another service, e.g. "/api/notes=notes" (repeatable)
    #[arg(long = "route")]
    pub routes: Vec<RouteConfig>,

    // Collector ingestion endpoint
    #[arg(long, default_value = "http://localhost:8080/collector/ingest")]
    pub collector_url: String,

    // Max records waiting for delivery before new ones are dropped
    #[arg(long, default_value_t = 1024)]
    pub collector_queue: usize,

    // Max concurrent deliveries
    #[arg(long, default_value_t = 32)]
    pub collector_concurrency: usize,

    // Delivery timeout in seconds
    #[arg(long, default_value_t = 5)]
    pub collector_timeout: u64,

    // Largest request body the proxy forwards
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,
}

impl Args {
    /// Config for the fronted service built from `--rate-limit`/`--rate-window`.
    pub fn primary_limit(&self) -> Result<RateLimitConfig, TrackerError> {
        RateLimitConfig::new(&self.service_name, self.rate_limit, self.rate_window)
    }

    /// Every configured limit, primary first. A service may only be named once.
    pub fn rate_limit_configs(&self) -> Result<Vec<RateLimitConfig>, TrackerError> {
        let mut configs = vec![self.primary_limit()?];
        for cfg in &self.service_limits {
            if configs.iter().any(|c| c.service_name == cfg.service_name) {
                return Err(TrackerError::InvalidConfig(format!(
                    "service {} has more than one rate limit",
                    cfg.service_name
                )));
            }
            configs.push(cfg.clone());
        }
        Ok(configs)
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            url: self.collector_url.clone(),
            queue_capacity: self.collector_queue.max(1),
            max_in_flight: self.collector_concurrency.max(1),
            timeout: Duration::from_secs(self.collector_timeout),
        }
    }
}

/// Fixed-window limit for one service. Loaded once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub service_name: String,
    pub limit: u64,
    pub window_duration_secs: u64,
}

impl RateLimitConfig {
    pub fn new(
        service_name: impl Into<String>,
        limit: u64,
        window_duration_secs: u64,
    ) -> Result<Self, TrackerError> {
        let service_name = service_name.into();
        if service_name.trim().is_empty() {
            return Err(TrackerError::InvalidConfig("service name is empty".into()));
        }
        if limit == 0 {
            return Err(TrackerError::InvalidConfig(format!(
                "limit for {service_name} must be greater than zero"
            )));
        }
        if window_duration_secs == 0 {
            return Err(TrackerError::InvalidConfig(format!(
                "window for {service_name} must be greater than zero"
            )));
        }
        Ok(Self {
            service_name,
            limit,
            window_duration_secs,
        })
    }

    /// Default limits applied to a service that has no explicit config.
    pub fn fallback(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            limit: DEFAULT_LIMIT,
            window_duration_secs: DEFAULT_WINDOW_SECS,
        }
    }

    pub fn window_millis(&self) -> i64 {
        (self.window_duration_secs as i64).saturating_mul(1000)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::fallback(DEFAULT_SERVICE_NAME)
    }
}

// "name=limit/window_secs", window part optional
impl FromStr for RateLimitConfig {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, budget) = s.split_once('=').ok_or_else(|| {
            TrackerError::InvalidConfig(format!("expected NAME=LIMIT/WINDOW, got {s:?}"))
        })?;

        let (limit, window) = match budget.split_once('/') {
            Some((limit, window)) => (limit, window),
            None => (budget, "1"),
        };

        let limit = limit
            .trim()
            .parse::<u64>()
            .map_err(|e| TrackerError::InvalidConfig(format!("bad limit in {s:?}: {e}")))?;
        let window = window
            .trim()
            .parse::<u64>()
            .map_err(|e| TrackerError::InvalidConfig(format!("bad window in {s:?}: {e}")))?;

        Self::new(name.trim(), limit, window)
    }
}

/// Requests whose path starts with `prefix` are tracked as `service_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    pub prefix: String,
    pub service_name: String,
}

// "prefix=service"
impl FromStr for RouteConfig {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, service_name) = s.split_once('=').ok_or_else(|| {
            TrackerError::InvalidConfig(format!("expected PREFIX=SERVICE, got {s:?}"))
        })?;
        let (prefix, service_name) = (prefix.trim(), service_name.trim());
        if !prefix.starts_with('/') {
            return Err(TrackerError::InvalidConfig(format!(
                "route prefix must start with '/', got {prefix:?}"
            )));
        }
        if service_name.is_empty() {
            return Err(TrackerError::InvalidConfig(format!("route {prefix} has no service")));
        }
        Ok(Self {
            prefix: prefix.to_string(),
            service_name: service_name.to_string(),
        })
    }
}

/// Where and how records are shipped.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub url: String,
    pub queue_capacity: usize,
    pub max_in_flight: usize,
    pub timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/collector/ingest".to_string(),
            queue_capacity: 1024,
            max_in_flight: 32,
            timeout: Duration::from_secs(5),
        }
    }
}

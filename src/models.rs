use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Wire record shipped to the collector, one per completed request
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiLogRecord {
    pub service_name: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: u64,
    pub request_size: u64,
    pub response_size: u64,
    pub timestamp: DateTime<Utc>,
    pub rate_limit_hit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn serializes_with_collector_field_names() {
        let record = ApiLogRecord {
            service_name: "notes".into(),
            endpoint: "/api/notes/42".into(),
            method: "GET".into(),
            status_code: 200,
            latency_ms: 12,
            request_size: 0,
            response_size: 512,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            rate_limit_hit: true,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["serviceName"], "notes");
        assert_eq!(json["endpoint"], "/api/notes/42");
        assert_eq!(json["method"], "GET");
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["latencyMs"], 12);
        assert_eq!(json["requestSize"], 0);
        assert_eq!(json["responseSize"], 512);
        assert_eq!(json["timestamp"], "2024-05-01T12:30:00Z");
        assert_eq!(json["rateLimitHit"], true);
        assert_eq!(json.as_object().unwrap().len(), 9);
    }
}

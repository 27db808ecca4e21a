use api_tracker::server::create_router;
use api_tracker::state::AppState;
use api_tracker::{
    ApiLogRecord, CollectorClient, CollectorConfig, RateLimitConfig, RateLimiterRegistry, Tracker,
};
use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, StatusCode},
    routing::get,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

// stand-in for the service behind the gateway
async fn start_upstream() -> String {
    let app = Router::new()
        .route(
            "/api/notes",
            get(|| async { "[\"first\",\"second\"]" })
                .post(|body: Bytes| async move { (StatusCode::CREATED, body) }),
        )
        .route("/api/broken", get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn dead_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn gateway(upstream: &str, collector: CollectorClient, limit: u64) -> Router {
    let registry = RateLimiterRegistry::new([RateLimitConfig::new("notes", limit, 3600).unwrap()]);
    let tracker = Arc::new(Tracker::from_registry("notes", &registry, collector));
    let state = Arc::new(AppState::new(reqwest::Client::new(), upstream, tracker, 1024 * 1024));
    create_router(state)
}

async fn next_record(rx: &mut mpsc::Receiver<ApiLogRecord>) -> ApiLogRecord {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no record emitted")
        .expect("collector channel closed")
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn forwards_and_records_requests() {
    let upstream = start_upstream().await;
    let (collector, mut rx) = CollectorClient::channel(16);
    let app = gateway(&upstream, collector, 100);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/notes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "[\"first\",\"second\"]");

    let record = next_record(&mut rx).await;
    assert_eq!(record.endpoint, "/api/notes");
    assert_eq!(record.status_code, 200);
    assert_eq!(record.response_size, 18);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/notes")
                .body(Body::from("new note"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_string(response).await, "new note");

    let record = next_record(&mut rx).await;
    assert_eq!(record.method, "POST");
    assert_eq!(record.status_code, 201);
    assert_eq!(record.request_size, 8);
}

#[tokio::test]
async fn upstream_status_is_passed_through() {
    let upstream = start_upstream().await;
    let (collector, mut rx) = CollectorClient::channel(16);
    let app = gateway(&upstream, collector, 100);

    let response = app
        .oneshot(Request::builder().uri("/api/broken").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(next_record(&mut rx).await.status_code, 503);
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let upstream = dead_address().await;
    let (collector, mut rx) = CollectorClient::channel(16);
    let app = gateway(&upstream, collector, 100);

    let response = app
        .oneshot(Request::builder().uri("/api/notes").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(next_record(&mut rx).await.status_code, 502);
}

#[tokio::test]
async fn health_and_metrics_are_not_tracked() {
    let upstream = start_upstream().await;
    let (collector, mut rx) = CollectorClient::channel(16);
    let app = gateway(&upstream, collector, 100);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "notes");

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn dead_collector_does_not_change_responses() {
    let upstream = start_upstream().await;
    let config = CollectorConfig {
        url: format!("{}/collector/ingest", dead_address().await),
        timeout: Duration::from_millis(200),
        ..CollectorConfig::default()
    };
    let (collector, _dispatcher) = CollectorClient::spawn(config, reqwest::Client::new());
    // limit of 1 so most requests are over budget as well
    let app = gateway(&upstream, collector, 1);

    for _ in 0..20 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/notes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "[\"first\",\"second\"]");
    }
}

#[tokio::test]
async fn routed_paths_use_their_own_service_limit() {
    let upstream = start_upstream().await;
    let (collector, mut rx) = CollectorClient::channel(16);
    let registry = RateLimiterRegistry::new([
        RateLimitConfig::new("gateway", 100, 3600).unwrap(),
        RateLimitConfig::new("notes", 1, 3600).unwrap(),
    ]);
    let tracker = Tracker::from_registry("gateway", &registry, collector).with_route(
        "/api/notes",
        "notes",
        registry.limiter_for("notes"),
    );
    let state = Arc::new(AppState::new(
        reqwest::Client::new(),
        &upstream,
        Arc::new(tracker),
        1024 * 1024,
    ));
    let app = create_router(state);

    let mut records = Vec::new();
    for uri in ["/api/notes", "/api/notes", "/api/broken"] {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        records.push(next_record(&mut rx).await);
    }

    assert_eq!(records[0].service_name, "notes");
    assert!(!records[0].rate_limit_hit);
    assert_eq!(records[1].service_name, "notes");
    assert!(records[1].rate_limit_hit);
    assert_eq!(records[2].service_name, "gateway");
    assert_eq!(records[2].status_code, 503);
    assert!(!records[2].rate_limit_hit);
}

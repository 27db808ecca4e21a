use api_tracker::config::Args;
use api_tracker::rate_limit::RateLimiterRegistry;
use api_tracker::server::create_router;
use api_tracker::state::AppState;
use api_tracker::{CollectorClient, Tracker};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // parse cli arguments
    let args = Args::parse();

    // limits are fixed from here on
    let registry = RateLimiterRegistry::new(args.rate_limit_configs()?);

    let client = reqwest::Client::new();

    // spawn the collector dispatcher
    let (collector, dispatcher) = CollectorClient::spawn(args.collector_config(), client.clone());

    let mut tracker = Tracker::from_registry(&args.service_name, &registry, collector);
    for route in &args.routes {
        tracing::info!("Tracking {}* as {}", route.prefix, route.service_name);
        let limiter = registry.limiter_for(&route.service_name);
        tracker = tracker.with_route(&route.prefix, &route.service_name, limiter);
    }
    let tracker = Arc::new(tracker);

    let state = Arc::new(AppState::new(client, &args.upstream, tracker, args.max_body_bytes));
    let app = create_router(Arc::clone(&state));

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Gateway running on http://localhost:{}", args.port);
    tracing::info!("Forwarding to {}", state.upstream);
    tracing::info!("Shipping logs to {}", args.collector_url);
    tracing::info!(
        "Rate limit for {}: {} requests per {} seconds",
        args.service_name, args.rate_limit, args.rate_window
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // the router is gone; the last collector handle goes with the state
    drop(state);
    if tokio::time::timeout(Duration::from_secs(5), dispatcher).await.is_err() {
        tracing::warn!("Collector did not drain in time, pending log records dropped");
    }

    Ok(())
}

use msgqueue_engine::{
    api::{build_router, AppState},
    config::Config,
    directory::ServiceDirectory,
    relay::{build_relay_service, RelayDependencies},
    scheduler::create_scheduler,
    state::create_store,
    status::TracingStatusSink,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "msgqueue_engine={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting message queue engine v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        msgqueue_engine::metrics::init_pipeline_metrics();
        tracing::info!("Prometheus metrics initialized");
    } else {
        tracing::info!("Prometheus metrics disabled in configuration");
    }

    // Initialize storage and scheduling
    tracing::info!("Storage backend: {:?}", config.state.backend);
    let store = create_store(&config.state)?;
    tracing::info!("Scheduler backend: {:?}", config.scheduler.backend);
    let scheduler = create_scheduler(&config.scheduler).await?;

    // Build one message service per relay
    let deps = RelayDependencies {
        store,
        scheduler: scheduler.clone(),
        status_sink: Arc::new(TracingStatusSink),
        settings: config.engine.settings(),
    };
    let directory = ServiceDirectory::new();
    let mut relays = Vec::with_capacity(config.relays.len());
    for relay in &config.relays {
        let service = build_relay_service(relay, &deps)?;
        directory.register(Arc::new(service.clone()))?;
        relays.push(service);
    }
    if directory.is_empty() {
        tracing::warn!("No relays configured; the engine will idle");
    }

    directory.start_all().await?;
    tracing::info!(services = directory.len(), "Message services started");

    // HTTP server
    let state = AppState::new(directory.clone()).with_relays(relays);
    let app = build_router(state);

    let http_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("HTTP server listening on {}", http_addr);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Shutting down gracefully...");
    directory.stop_all().await;
    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Scheduler shutdown failed: {}", e);
    }

    Ok(())
}

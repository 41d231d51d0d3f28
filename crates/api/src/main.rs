//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use event_store::InMemoryEventStore;
use saga::SystemClock;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Wire services, saga and read models
    let (state, router) = api::build_state(
        InMemoryEventStore::new(),
        Arc::new(SystemClock),
        config.saga_config(),
        config.router_shards,
    );

    // 4. Seed the catalog and resume unfinished sagas
    let report = api::bootstrap::bootstrap(&state, &config.seed_stock).await?;
    tracing::info!(
        seeded = report.seeded,
        resumed = report.recovery.resumed,
        failed = report.recovery.failed,
        republished = report.republished,
        "startup recovery done"
    );

    // 5. Start the router workers and the timeout sweeper
    let workers = router.spawn();
    let sweeper = api::sweeper::spawn(Arc::clone(&state), config.timeout_sweep_interval);

    // 6. Start server
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, shards = workers.len(), "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    for worker in workers {
        worker.abort();
    }
    router.shutdown().await;
    tracing::info!("server shut down gracefully");
    Ok(())
}

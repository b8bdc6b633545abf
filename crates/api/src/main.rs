//! API server entry point.

use api::config::Config;
use api::{AppState, Partners};
use booking::{BookingStore, BookingTables, BookingTx};
use messaging::InMemoryBus;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use store::{Database, MemoryDatabase, OutboxStore, PostgresDatabase};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn serve<D>(store: BookingStore<D>, config: Config, metrics_handle: PrometheusHandle)
where
    D: Database + OutboxStore + Clone + 'static,
    D::Tx: BookingTx,
{
    let shutdown = CancellationToken::new();
    let bus = InMemoryBus::new();

    let workers = api::spawn_workers(
        &store,
        &bus,
        Partners::in_memory(),
        &config,
        shutdown.clone(),
    )
    .await
    .expect("failed to start workers");

    let app = api::create_app(AppState::new(store, config.ledger.clone()), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .expect("server error");

    // The server can also stop on its own; make sure the workers follow.
    shutdown.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "worker task failed");
        }
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the storage backend and run
    match config.database_url.clone() {
        Some(url) => {
            let db = PostgresDatabase::connect(&url, config.database_max_connections)
                .await
                .expect("failed to connect to PostgreSQL");
            db.run_migrations().await.expect("failed to run migrations");
            tracing::info!("using PostgreSQL storage");
            serve(BookingStore::new(db), config, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory storage");
            let db = MemoryDatabase::<BookingTables>::new();
            serve(BookingStore::new(db), config, metrics_handle).await;
        }
    }
}

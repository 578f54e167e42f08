use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use bookgen_api::config::ServerConfig;
use bookgen_api::router::build_app;
use bookgen_api::state::AppState;
use bookgen_forge::ImageService;
use bookgen_pipeline::ApiRunner;
use bookgen_worker::{BookStore, JobRegistry, StreamSettings, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookgen_api=debug,bookgen_worker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env()?;
    let worker = WorkerConfig::from_env()?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        forge = %worker.forge_base_url,
        swap = %worker.swap_base_url,
        books = %worker.books_dir.display(),
        logs = %worker.logs_dir.display(),
        "Loaded worker configuration"
    );

    // --- Services ---
    let service: Arc<dyn ImageService> = Arc::new(worker.forge_api());
    let runner = Arc::new(ApiRunner::new(Arc::clone(&service)));
    let registry = Arc::new(JobRegistry::new(runner, &worker));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
        books: Arc::new(BookStore::new(&worker.books_dir)),
        service,
        stream: StreamSettings {
            poll: worker.stream_poll,
            progress_interval: worker.progress_poll,
            replay_log: false,
        },
    };

    let app = build_app(state);

    // --- Start server ---
    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

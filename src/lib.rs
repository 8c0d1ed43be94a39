pub mod app;
pub mod config;
pub mod contacts;
pub mod db;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod session;
pub mod wa;

use app::{AppState, build_router};
use config::Config;
use tokio::signal;

/// Starts the blastwarp-api runtime.
pub async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    observability::init_tracing(config.log_json);

    let bind_addr = config.bind_addr;
    tracing::info!(%bind_addr, data_dir = %config.data_dir.display(), "starting blastwarp-api");

    let state = AppState::from_config(&config);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    state.set_ready(true);

    axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.set_ready(false);
    state.registry().shutdown().await;
    tracing::info!("blastwarp-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

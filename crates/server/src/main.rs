#![forbid(unsafe_code)]

use clap::Parser;
use dw_core::Backend;
use dw_runner::LocalSession;
use dw_server::{Engine, ServerConfig, now_ms, router};
use dw_storage::SqliteStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "dw_server=info,dw_runner=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let backend: Arc<dyn Backend> = match LocalSession::open() {
        Ok(session) => Arc::new(session),
        Err(err) => {
            error!(error = %err, "backend session failed to open");
            return Err(err.into());
        }
    };
    let store = match SqliteStore::open(&config.storage_dir) {
        Ok(store) => store,
        Err(err) => {
            error!(storage_dir = %config.storage_dir.display(), error = %err, "store failed to open");
            return Err(err.into());
        }
    };
    info!(db = %store.db_path().display(), "store opened");

    let engine = Arc::new(Engine::recover(backend, store, now_ms())?);
    let app = router(Arc::clone(&engine), config.http_options());

    let listener = TcpListener::bind(&config.bind).await?;
    info!(
        bind = %config.bind,
        signed = config.http_options().secret.is_some(),
        "listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.close()?;
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

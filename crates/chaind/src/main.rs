//! chaind: bootstrap every configured endpoint, then serve status over HTTP until SIGINT/SIGTERM.

use anyhow::Context;
use chaind::{Daemon, DaemonConfig, EnvOverrides, ReqwestTransport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let env = EnvOverrides::from_env();
    let config = DaemonConfig::from_env(&env).context("configuration")?;
    let catalog = config.load_catalog().context("endpoint catalog")?;
    info!(port = config.port, endpoints = catalog.len(), "starting chaind");

    let transport = ReqwestTransport::new().context("http client")?;
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    Daemon::new(config, env, catalog, Arc::new(transport))
        .run(shutdown)
        .await
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(reason = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
    shutdown.cancel();
}

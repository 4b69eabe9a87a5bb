use std::sync::Arc;

use anyhow::Context;

use rigger_engine::{Engine, connect_store};
use rigger_infra::processors::LogNotifier;
use rigger_infra::{EngineConfig, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();
    rigger_observability::init();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let store = connect_store(&config)
        .await
        .context("failed to open marketplace store")?;

    let engine = Engine::start(&config, store, Arc::new(SystemClock), Arc::new(LogNotifier))
        .await
        .context("failed to start automation engine")?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, engine.router())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
        })
        .await
        .context("http server failed")?;

    engine.shutdown().await;
    Ok(())
}

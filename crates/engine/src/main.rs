//! Outcome engine - operation outcome learning service
//!
//! Hosts the learning engine: records interactions, retrains the ensemble
//! as the corpus grows and serves predictions, health and metrics over HTTP.

use anyhow::Result;
use engine_lib::{LearningEngine, RetrainScheduler};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting outcome-engine");

    let config = config::ServiceConfig::load()?;
    info!(
        data_dir = %config.engine.data_dir.display(),
        api_port = config.api_port,
        "Engine configured"
    );

    let engine = LearningEngine::open(config.engine.clone()).await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let scheduler = RetrainScheduler::new(engine.clone());
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(engine.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown_tx.subscribe()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Retrain scheduler task failed");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }
    engine.shutdown("SIGINT received").await;

    Ok(())
}

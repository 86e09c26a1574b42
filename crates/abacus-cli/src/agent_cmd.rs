//! `abacus agent` command: run the worker fleet until interrupted.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use abacus_core::agent::http::HttpTaskSource;
use abacus_core::agent::{TaskSource, run_workers};
use abacus_core::config::AgentConfig;

pub async fn run_agent(config: AgentConfig) -> Result<()> {
    tracing::info!(
        orchestrator = %config.orchestrator_url,
        computing_power = config.computing_power,
        "starting agent"
    );

    let source: Arc<dyn TaskSource> = Arc::new(HttpTaskSource::new(&config.orchestrator_url));

    // First ctrl-c cancels the evaluators; they exit at their next
    // suspension point.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        tracing::info!("shutdown requested");
        trigger.cancel();
    });

    run_workers(
        source,
        config.computing_power,
        config.polling_interval,
        cancel,
    )
    .await;

    tracing::info!("agent stopped");
    Ok(())
}

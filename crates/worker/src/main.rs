use std::sync::Arc;

use actflow_durable::{
    ExecutionLedger, InMemoryExecutionLedger, PostgresExecutionLedger, WorkflowEngine,
};
use actflow_worker::{driver, init_logging, LogConfig, WorkerConfig};
use anyhow::{Context, Result};
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    init_logging(&LogConfig::from_env());

    tracing::info!("actflow-worker starting...");

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    let ledger: Arc<dyn ExecutionLedger> = match &config.database_url {
        Some(url) => {
            let ledger = PostgresExecutionLedger::connect(url)
                .await
                .context("Failed to connect to the ledger database")?;
            ledger
                .migrate()
                .await
                .context("Failed to apply ledger migrations")?;
            tracing::info!("Using PostgreSQL execution ledger");
            Arc::new(ledger)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, executions will not survive a restart");
            Arc::new(InMemoryExecutionLedger::new())
        }
    };

    let pipeline = config.pipeline();
    tracing::info!(
        steps = pipeline.len(),
        collaborator = config.collaborator_url.as_deref().unwrap_or("none"),
        max_attempts = config.engine.retry.max_attempts,
        "Starting engine"
    );

    let engine = Arc::new(WorkflowEngine::new(ledger, pipeline, config.engine.clone()));

    let recovered = engine
        .recover()
        .await
        .context("Failed to recover unfinished executions")?;
    if recovered > 0 {
        tracing::info!(recovered, "Resumed unfinished executions");
    }

    let sweeper = engine.spawn_retention_sweeper(config.sweep_interval);

    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();

    // Serve until stdin closes or shutdown is requested
    tokio::select! {
        result = driver::run(engine.clone(), input, output) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Driver error");
                sweeper.abort();
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    sweeper.abort();
    tracing::info!("Worker shutdown complete");
    Ok(())
}

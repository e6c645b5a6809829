//! Cadence daemon
//!
//! Loads configuration, registers the schedules listed in the file named by
//! `CADENCE_SCHEDULES` (a JSON array of schedule specs) and runs the
//! scheduler until interrupted. Executions are logged and echo their inputs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use cadence_core::{ExecutionError, ExecutionRequest, WorkflowExecutor};
use cadence_domain::ScheduleSpec;
use cadence_infra::{config, init_tracing, WorkflowScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Executor that records the invocation and returns the inputs
struct LoggingExecutor;

#[async_trait]
impl WorkflowExecutor for LoggingExecutor {
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, ExecutionError> {
        if cancel.is_cancelled() {
            return Err(ExecutionError::cancelled());
        }
        info!(
            workflow_id = %request.workflow_id,
            execution_id = %request.execution_id,
            attempt = request.attempt,
            "Executing workflow"
        );
        Ok(request.inputs)
    }
}

fn load_schedules() -> anyhow::Result<Vec<ScheduleSpec>> {
    let Some(path) = std::env::var_os("CADENCE_SCHEDULES").map(PathBuf::from) else {
        return Ok(Vec::new());
    };
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("reading schedules from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parsing schedules in {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let config = config::load().context("loading configuration")?;
    init_tracing(config.logging.format);
    if let Err(err) = dotenv {
        if !err.not_found() {
            warn!(error = %err, "Ignoring unreadable .env file");
        }
    }

    let scheduler = WorkflowScheduler::new(&config, Arc::new(LoggingExecutor))?;
    for spec in load_schedules()? {
        let label = spec.name.clone().unwrap_or_else(|| spec.target.workflow_id.clone());
        let schedule_id = scheduler
            .register_spec(spec)
            .with_context(|| format!("registering schedule {label}"))?;
        info!(%schedule_id, %label, "Loaded schedule");
    }

    scheduler.start().await?;
    info!(schedules = scheduler.list_schedules().len(), "cadenced running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    scheduler.stop().await?;
    Ok(())
}

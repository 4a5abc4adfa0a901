//! Sequence execution loop.
//!
//! Phases run strictly in order. Inside a phase, tasks run according to the
//! phase's execution mode; the executor always waits for every dispatched
//! task before looking at errors, and reports the first error in declared
//! task order.

use super::metrics::{PhaseMetrics, SequenceMetrics, TaskMetrics, TaskOutcome};
use super::phase::{ExecutionMode, Phase};
use super::task::BoxedTask;
use crate::context::ExecutionContext;
use futures::future::join_all;
use machined_shared::{MachinedError, MachinedResult};
use tokio::time::Instant;
use tracing::Instrument;

pub struct SequenceExecutor;

impl SequenceExecutor {
    /// Execute `phases` in order.
    ///
    /// A task returning [`MachinedError::Reboot`] ends the sequence
    /// successfully with `metrics.restart` set. Any other error aborts it.
    pub async fn execute(phases: &[Phase], ctx: &ExecutionContext) -> MachinedResult<SequenceMetrics> {
        let total_start = Instant::now();
        let mut metrics = SequenceMetrics::default();

        for (index, phase) in phases.iter().enumerate() {
            if let Some(err) = ctx.err() {
                tracing::warn!(phase = phase.name(), error = %err, "Sequence interrupted");
                return Err(err);
            }

            if !phase.applies(ctx) {
                tracing::debug!(phase = phase.name(), "Phase skipped");
                metrics.phases.push(PhaseMetrics {
                    index,
                    name: phase.name(),
                    execution: phase.execution(),
                    skipped: true,
                    duration_ms: 0,
                    tasks: Vec::new(),
                });
                continue;
            }

            let phase_start = Instant::now();
            let span = tracing::info_span!("phase", phase = phase.name(), index);
            tracing::info!(
                phase = phase.name(),
                index,
                total = phases.len(),
                tasks = phase.tasks().len(),
                "Phase starting"
            );

            let (task_metrics, result) = run_phase(phase, ctx).instrument(span).await;

            metrics.phases.push(PhaseMetrics {
                index,
                name: phase.name(),
                execution: phase.execution(),
                skipped: false,
                duration_ms: phase_start.elapsed().as_millis(),
                tasks: task_metrics,
            });

            match result {
                Ok(()) => {
                    tracing::info!(
                        phase = phase.name(),
                        duration_ms = phase_start.elapsed().as_millis() as u64,
                        "Phase done"
                    );
                }
                Err(MachinedError::Reboot(cmd)) => {
                    tracing::info!(phase = phase.name(), cmd = %cmd, "Sequence requested reboot");
                    metrics.restart = Some(cmd);
                    break;
                }
                Err(err) => {
                    tracing::error!(phase = phase.name(), error = %err, "Phase failed");
                    return Err(err);
                }
            }
        }

        metrics.total_duration_ms = total_start.elapsed().as_millis();
        Ok(metrics)
    }
}

async fn run_phase(phase: &Phase, ctx: &ExecutionContext) -> (Vec<TaskMetrics>, MachinedResult<()>) {
    match phase.execution() {
        ExecutionMode::Parallel => {
            let results = join_all(phase.tasks().iter().map(|task| run_task(task, ctx))).await;

            let mut first_err = None;
            let mut task_metrics = Vec::with_capacity(results.len());
            for (metrics, result) in results {
                task_metrics.push(metrics);
                if let Err(err) = result
                    && first_err.is_none()
                {
                    first_err = Some(err);
                }
            }

            (task_metrics, first_err.map_or(Ok(()), Err))
        }
        ExecutionMode::Sequential => {
            let mut task_metrics = Vec::with_capacity(phase.tasks().len());
            for task in phase.tasks() {
                let (metrics, result) = run_task(task, ctx).await;
                task_metrics.push(metrics);
                if let Err(err) = result {
                    return (task_metrics, Err(err));
                }
            }
            (task_metrics, Ok(()))
        }
    }
}

async fn run_task(task: &BoxedTask, ctx: &ExecutionContext) -> (TaskMetrics, MachinedResult<()>) {
    let name = task.name().to_string();
    let span = tracing::info_span!(parent: ctx.span(), "task", task = %name);
    let task_ctx = ctx.with_span(span.clone());
    let task_start = Instant::now();

    tracing::info!(parent: &span, task = %name, "Task starting");

    let result = task.run(&task_ctx).instrument(span.clone()).await;
    let duration_ms = task_start.elapsed().as_millis();

    let outcome = match &result {
        Ok(()) => {
            tracing::info!(parent: &span, task = %name, duration_ms = duration_ms as u64, "Task done");
            TaskOutcome::Succeeded
        }
        Err(MachinedError::Reboot(cmd)) => {
            tracing::info!(parent: &span, task = %name, cmd = %cmd, "Task requested reboot");
            TaskOutcome::Restart(*cmd)
        }
        Err(err) => {
            tracing::error!(
                parent: &span,
                task = %name,
                duration_ms = duration_ms as u64,
                error = %err,
                "Task failed"
            );
            TaskOutcome::Failed(err.to_string())
        }
    };

    (
        TaskMetrics {
            name,
            duration_ms,
            outcome,
        },
        result,
    )
}

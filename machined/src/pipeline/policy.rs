//! Error-policy decorators.
//!
//! Each decorator wraps a [`BoxedTask`] and keeps its name, so decorators
//! compose: `log_errors(pause_on_failure(task))` pauses first, then
//! downgrades the error. A reboot request is never intercepted.

use super::task::{BoxedTask, Task};
use crate::context::ExecutionContext;
use async_trait::async_trait;
use machined_shared::MachinedResult;
use std::sync::Arc;
use std::time::Duration;

/// Turns task errors into logged warnings.
pub struct LogErrors {
    inner: BoxedTask,
}

pub fn log_errors(task: BoxedTask) -> BoxedTask {
    Arc::new(LogErrors { inner: task })
}

#[async_trait]
impl Task for LogErrors {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        match self.inner.run(ctx).await {
            Err(err) if err.reboot_cmd().is_none() => {
                tracing::warn!(task = self.name(), error = %err, "Task failed, continuing");
                Ok(())
            }
            other => other,
        }
    }
}

/// On failure, holds the error for a cooldown so an operator can fix the
/// machine before it reboots, then returns it unchanged.
pub struct PauseOnFailure {
    inner: BoxedTask,
    cooldown: Option<Duration>,
}

/// Pause for the runtime's configured cooldown.
pub fn pause_on_failure(task: BoxedTask) -> BoxedTask {
    Arc::new(PauseOnFailure {
        inner: task,
        cooldown: None,
    })
}

pub fn pause_on_failure_for(task: BoxedTask, cooldown: Duration) -> BoxedTask {
    Arc::new(PauseOnFailure {
        inner: task,
        cooldown: Some(cooldown),
    })
}

#[async_trait]
impl Task for PauseOnFailure {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let err = match self.inner.run(ctx).await {
            Err(err) if err.reboot_cmd().is_none() => err,
            other => return other,
        };

        let cooldown = self
            .cooldown
            .unwrap_or(ctx.runtime().options().pause_on_failure);

        tracing::error!(
            task = self.name(),
            error = %err,
            cooldown_secs = cooldown.as_secs(),
            "Task failed, rebooting after cooldown; apply a corrected config to recover"
        );

        tokio::select! {
            _ = tokio::time::sleep(cooldown) => {}
            _ = ctx.done() => {}
        }

        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FnTask, TestRuntime};
    use machined_shared::{MachinedError, RebootCmd};
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_log_errors_swallows_failure() {
        let (ctx, _cancel) = TestRuntime::new().context();
        let task = log_errors(FnTask::failing("flaky", || {
            MachinedError::Service("boom".into())
        }));
        assert_eq!(task.name(), "flaky");
        task.run(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_log_errors_keeps_reboot() {
        let (ctx, _cancel) = TestRuntime::new().context();
        let task = log_errors(FnTask::failing("reboot", || {
            MachinedError::Reboot(RebootCmd::Restart)
        }));
        let err = task.run(&ctx).await.unwrap_err();
        assert_eq!(err.reboot_cmd(), Some(RebootCmd::Restart));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_waits_cooldown_then_fails() {
        let (ctx, _cancel) = TestRuntime::new().context();
        let task = pause_on_failure_for(
            FnTask::failing("config", || MachinedError::Config("invalid".into())),
            Duration::from_secs(300),
        );

        let start = Instant::now();
        let err = task.run(&ctx).await.unwrap_err();
        assert!(matches!(err, MachinedError::Config(_)));
        assert_eq!(start.elapsed(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_ends_on_cancel() {
        let (ctx, cancel) = TestRuntime::new().context();
        let task = pause_on_failure(FnTask::failing("config", || {
            MachinedError::Config("invalid".into())
        }));

        let handle = tokio::spawn(async move { task.run(&ctx).await });
        tokio::time::sleep(Duration::from_secs(10)).await;
        let start = Instant::now();
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, MachinedError::Config(_)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_does_not_pause() {
        let (ctx, _cancel) = TestRuntime::new().context();
        let task = pause_on_failure(FnTask::ok("fine"));
        let start = Instant::now();
        task.run(&ctx).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decorators_compose() {
        let (ctx, _cancel) = TestRuntime::new().context();
        let task = log_errors(pause_on_failure_for(
            FnTask::failing("both", || MachinedError::Mount("busy".into())),
            Duration::from_secs(5),
        ));

        let start = Instant::now();
        task.run(&ctx).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}

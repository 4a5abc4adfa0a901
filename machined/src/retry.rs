//! Bounded constant-interval retry.
//!
//! A [`RetryPolicy`] calls the operation immediately, then again every
//! `interval` for as long as the operation fails with an *expected* error and
//! the `max_duration` budget lasts. Anything else ends the loop at once:
//! - success returns the value
//! - a fatal error is returned as-is
//! - budget exhaustion returns the last expected error, unwrapped
//! - context cancellation or deadline returns the context error, even while
//!   an attempt is in flight
//! - an attempt still running when the budget ends yields `DeadlineExceeded`

use crate::context::ExecutionContext;
use machined_shared::{MachinedError, MachinedResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How a failed attempt is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Expected,
    Fatal,
}

pub type Classifier = Arc<dyn Fn(&MachinedError) -> ErrorClass + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    interval: Duration,
    max_duration: Duration,
    log_errors: bool,
    classify: Classifier,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("interval", &self.interval)
            .field("max_duration", &self.max_duration)
            .field("log_errors", &self.log_errors)
            .finish()
    }
}

/// Default classifier: only errors wrapped with [`MachinedError::expected`] are retried.
pub fn classify_expected(err: &MachinedError) -> ErrorClass {
    if err.is_expected() {
        ErrorClass::Expected
    } else {
        ErrorClass::Fatal
    }
}

impl RetryPolicy {
    /// Retry every second for at most `max_duration`.
    pub fn constant(max_duration: Duration) -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_duration,
            log_errors: false,
            classify: Arc::new(classify_expected),
        }
    }

    pub fn with_units(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Log every expected failure at warn level.
    pub fn with_error_logging(mut self, enabled: bool) -> Self {
        self.log_errors = enabled;
        self
    }

    pub fn with_classifier<F>(mut self, classify: F) -> Self
    where
        F: Fn(&MachinedError) -> ErrorClass + Send + Sync + 'static,
    {
        self.classify = Arc::new(classify);
        self
    }

    pub async fn retry_with_context<T, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        mut op: F,
    ) -> MachinedResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MachinedResult<T>>,
    {
        let budget_end = Instant::now() + self.max_duration;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            // An attempt never outlives the budget or the context.
            let err = match tokio::time::timeout_at(budget_end, ctx.bound(op())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => {
                    if let Some(ctx_err) = ctx.err() {
                        return Err(ctx_err);
                    }
                    err
                }
                Err(_) => {
                    tracing::debug!(attempt, "Retry budget exhausted during attempt");
                    return Err(MachinedError::DeadlineExceeded(format!(
                        "attempt {} still running after {:?}",
                        attempt, self.max_duration
                    )));
                }
            };

            if (self.classify)(&err) == ErrorClass::Fatal {
                return Err(err.into_inner());
            }

            if self.log_errors {
                tracing::warn!(attempt, error = %err, "Retrying after expected error");
            }

            let now = Instant::now();
            if now >= budget_end {
                tracing::debug!(attempt, "Retry budget exhausted");
                return Err(err.into_inner());
            }

            let wake = std::cmp::min(now + self.interval, budget_end);
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                ctx_err = ctx.done() => return Err(ctx_err),
            }
        }
    }
}

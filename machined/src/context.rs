//! Per-invocation execution context.
//!
//! An [`ExecutionContext`] is what every task, condition and retry loop
//! receives. It carries:
//! - the shared [`Runtime`] handle
//! - the sequence being executed and its payload
//! - a cancellation signal (fired by the matching [`Canceller`])
//! - an optional deadline, tightened by [`ExecutionContext::with_timeout`]
//! - the tracing span task logs are recorded under
//!
//! Contexts are cheap to clone; a child created with `with_timeout` shares
//! the parent's cancellation signal.

use crate::runtime::Runtime;
use crate::sequencer::{Sequence, SequenceData};
use machined_shared::{MachinedError, MachinedResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Clone)]
pub struct ExecutionContext {
    runtime: Runtime,
    sequence: Sequence,
    data: Arc<SequenceData>,
    cancel: watch::Receiver<bool>,
    deadline: Option<Instant>,
    span: tracing::Span,
}

/// Fires cancellation for every context derived from the same root.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl ExecutionContext {
    /// Create a root context for one sequence run.
    pub fn new(runtime: Runtime, sequence: Sequence, data: SequenceData) -> (Self, Canceller) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            runtime,
            sequence,
            data: Arc::new(data),
            cancel: rx,
            deadline: None,
            span: tracing::Span::current(),
        };
        (ctx, Canceller { tx })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn data(&self) -> &SequenceData {
        &self.data
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Child context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn with_span(&self, span: tracing::Span) -> Self {
        Self {
            span,
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Non-blocking check: the error `done()` would resolve to right now.
    pub fn err(&self) -> Option<MachinedError> {
        if self.is_cancelled() {
            return Some(MachinedError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(deadline_exceeded()),
            _ => None,
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> MachinedError {
        let cancelled = wait_cancelled(self.cancel.clone());
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancelled => MachinedError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => deadline_exceeded(),
                }
            }
            None => {
                cancelled.await;
                MachinedError::Cancelled
            }
        }
    }

    /// Sleep for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> MachinedResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            err = self.done() => Err(err),
        }
    }

    /// Drive `fut` to completion unless the context ends first.
    pub async fn bound<T, F>(&self, fut: F) -> MachinedResult<T>
    where
        F: Future<Output = MachinedResult<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            res = fut => res,
            err = self.done() => Err(err),
        }
    }
}

fn deadline_exceeded() -> MachinedError {
    MachinedError::DeadlineExceeded("context deadline exceeded".into())
}

async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Canceller dropped without firing: this context can no longer be cancelled.
            std::future::pending::<()>().await;
        }
    }
}

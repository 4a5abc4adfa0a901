use super::{BoxedCondition, Condition};
use crate::context::ExecutionContext;
use async_trait::async_trait;
use futures::future::try_join_all;
use machined_shared::MachinedResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Satisfied once every child condition is.
///
/// Children are waited on concurrently; `describe` lists the ones still
/// pending, so it can be polled for progress while `wait` runs.
pub struct AllConditions {
    conditions: Vec<BoxedCondition>,
    done: Vec<AtomicBool>,
}

impl AllConditions {
    pub fn new(conditions: Vec<BoxedCondition>) -> Self {
        let done = conditions.iter().map(|_| AtomicBool::new(false)).collect();
        Self { conditions, done }
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    fn pending(&self) -> Vec<String> {
        self.conditions
            .iter()
            .zip(&self.done)
            .filter(|(_, done)| !done.load(Ordering::SeqCst))
            .map(|(cond, _)| cond.describe())
            .collect()
    }
}

#[async_trait]
impl Condition for AllConditions {
    fn describe(&self) -> String {
        let pending = self.pending();
        if pending.is_empty() {
            return format!("all {} conditions satisfied", self.conditions.len());
        }
        format!(
            "{} of {} conditions pending: {}",
            pending.len(),
            self.conditions.len(),
            pending.join(", ")
        )
    }

    async fn wait(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        for done in &self.done {
            done.store(false, Ordering::SeqCst);
        }

        let waits = self
            .conditions
            .iter()
            .zip(&self.done)
            .map(|(cond, done)| async move {
                cond.wait(ctx).await?;
                done.store(true, Ordering::SeqCst);
                Ok::<(), machined_shared::MachinedError>(())
            });

        ctx.bound(async { try_join_all(waits).await.map(drop) }).await
    }
}

/// Wait for `cond`, logging its description every `cadence` until it
/// resolves. The wait itself still ends as soon as the context does.
pub async fn wait_with_progress(
    cond: &dyn Condition,
    ctx: &ExecutionContext,
    cadence: Duration,
) -> MachinedResult<()> {
    let mut ticker = tokio::time::interval_at(Instant::now() + cadence, cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(progress = %cond.describe(), "Waiting");

    let wait = cond.wait(ctx);
    tokio::pin!(wait);

    loop {
        tokio::select! {
            res = &mut wait => return res,
            _ = ticker.tick() => {
                tracing::info!(progress = %cond.describe(), "Waiting");
            }
        }
    }
}

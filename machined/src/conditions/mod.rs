//! Waitable readiness predicates.
//!
//! A [`Condition`] is re-evaluated every time it is waited on; nothing is
//! cached between waits. All waits end early with the context's error when
//! the context is cancelled or its deadline passes.

mod aggregate;
mod service;

pub use aggregate::{AllConditions, wait_with_progress};
pub use service::{ServiceCondition, wait_for_service};

use crate::context::ExecutionContext;
use async_trait::async_trait;
use machined_shared::MachinedResult;

#[async_trait]
pub trait Condition: Send + Sync {
    /// Human-readable description of what is being waited for.
    fn describe(&self) -> String;

    async fn wait(&self, ctx: &ExecutionContext) -> MachinedResult<()>;
}

pub type BoxedCondition = Box<dyn Condition>;

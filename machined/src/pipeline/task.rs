//! Task trait for sequence execution.

use crate::context::ExecutionContext;
use async_trait::async_trait;
use machined_shared::MachinedResult;
use std::sync::Arc;

/// A named, side-effecting step of a sequence.
///
/// Tasks are built once into immutable phase tables and may run many times,
/// so `run` borrows `self`. Everything mutable lives behind the runtime.
#[async_trait]
pub trait Task: Send + Sync {
    /// Human-readable task name for logging.
    fn name(&self) -> &str;

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()>;
}

pub type BoxedTask = Arc<dyn Task>;

use super::Condition;
use crate::context::ExecutionContext;
use crate::runtime::services::{ServiceSupervisor, StateEvent};
use async_trait::async_trait;
use machined_shared::MachinedResult;
use std::sync::Arc;
use std::time::Duration;

/// Satisfied once the supervisor reports `id` in the target state.
pub struct ServiceCondition {
    supervisor: Arc<dyn ServiceSupervisor>,
    id: String,
    target: StateEvent,
    poll: Duration,
}

/// Condition for service `id` reaching `target`, re-read every `poll`.
pub fn wait_for_service(
    supervisor: Arc<dyn ServiceSupervisor>,
    target: StateEvent,
    id: impl Into<String>,
    poll: Duration,
) -> ServiceCondition {
    ServiceCondition {
        supervisor,
        id: id.into(),
        target,
        poll,
    }
}

impl ServiceCondition {
    fn satisfied(&self) -> bool {
        self.supervisor
            .state(&self.id)
            .is_some_and(|state| self.target.satisfied_by(state))
    }
}

#[async_trait]
impl Condition for ServiceCondition {
    fn describe(&self) -> String {
        format!("service {:?} to be {:?}", self.id, self.target.to_string())
    }

    async fn wait(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        loop {
            if self.satisfied() {
                return Ok(());
            }
            ctx.sleep(self.poll).await?;
        }
    }
}

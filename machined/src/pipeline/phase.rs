//! Phase definition for table-driven sequence execution.

use super::policy::log_errors;
use super::task::BoxedTask;
use crate::context::ExecutionContext;

/// Execution mode for a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Execute all tasks concurrently and wait for every one of them.
    Parallel,
    /// Execute tasks one after another, stopping at the first error.
    Sequential,
}

/// What a task failure does to the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhasePolicy {
    /// The first error aborts the sequence.
    Fatal,
    /// Errors are logged as warnings and the sequence moves on.
    LogAndContinue,
}

/// Run-time guard deciding whether a phase applies.
pub type PhasePredicate = fn(&ExecutionContext) -> bool;

/// A barrier-delimited group of tasks.
///
/// The sequencer does not start phase N+1 until every task of phase N has
/// finished, whatever the execution mode.
#[derive(Clone)]
pub struct Phase {
    name: &'static str,
    tasks: Vec<BoxedTask>,
    execution: ExecutionMode,
    policy: PhasePolicy,
    when: Vec<PhasePredicate>,
}

impl Phase {
    pub fn parallel(name: &'static str, tasks: Vec<BoxedTask>) -> Self {
        Self {
            name,
            tasks,
            execution: ExecutionMode::Parallel,
            policy: PhasePolicy::Fatal,
            when: Vec::new(),
        }
    }

    pub fn sequential(name: &'static str, tasks: Vec<BoxedTask>) -> Self {
        Self {
            execution: ExecutionMode::Sequential,
            ..Self::parallel(name, tasks)
        }
    }

    /// Downgrade every task error in this phase to a logged warning.
    pub fn best_effort(mut self) -> Self {
        if self.policy != PhasePolicy::LogAndContinue {
            self.tasks = self.tasks.into_iter().map(log_errors).collect();
            self.policy = PhasePolicy::LogAndContinue;
        }
        self
    }

    /// Only run this phase when `predicate` holds. Repeated calls add
    /// predicates; all of them must hold.
    pub fn when(mut self, predicate: PhasePredicate) -> Self {
        self.when.push(predicate);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn tasks(&self) -> &[BoxedTask] {
        &self.tasks
    }

    pub fn execution(&self) -> ExecutionMode {
        self.execution
    }

    pub fn policy(&self) -> PhasePolicy {
        self.policy
    }

    pub fn is_conditional(&self) -> bool {
        !self.when.is_empty()
    }

    pub fn applies(&self, ctx: &ExecutionContext) -> bool {
        self.when.iter().all(|predicate| predicate(ctx))
    }
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field(
                "tasks",
                &self.tasks.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("execution", &self.execution)
            .field("policy", &self.policy)
            .field("conditional", &!self.when.is_empty())
            .finish()
    }
}

use crate::pipeline::ExecutionMode;
use machined_shared::RebootCmd;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(String),
    Restart(RebootCmd),
}

#[derive(Debug, Clone)]
pub struct TaskMetrics {
    pub name: String,
    pub duration_ms: u128,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone)]
pub struct PhaseMetrics {
    pub index: usize,
    pub name: &'static str,
    pub execution: ExecutionMode,
    pub skipped: bool,
    pub duration_ms: u128,
    pub tasks: Vec<TaskMetrics>,
}

#[derive(Debug, Clone, Default)]
pub struct SequenceMetrics {
    pub total_duration_ms: u128,
    pub phases: Vec<PhaseMetrics>,
    /// Set when a task ended the sequence with a reboot request.
    pub restart: Option<RebootCmd>,
}

impl SequenceMetrics {
    pub fn task_duration_ms(&self, name: &str) -> Option<u128> {
        self.tasks().find(|task| task.name == name).map(|task| task.duration_ms)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskMetrics> {
        self.phases.iter().flat_map(|phase| phase.tasks.iter())
    }

    /// Names of phases that ran, in order.
    pub fn executed_phases(&self) -> Vec<&'static str> {
        self.phases
            .iter()
            .filter(|phase| !phase.skipped)
            .map(|phase| phase.name)
            .collect()
    }
}

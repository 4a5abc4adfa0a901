//! Table-driven sequence execution framework.
//!
//! ## Architecture
//!
//! ```text
//! Sequence → Phases → Tasks
//!
//! - Sequence: ordered list of phases, resolved from a static table
//! - Phase:    barrier-delimited group of tasks with an execution mode
//!             (parallel/sequential), an error policy and an optional guard
//! - Task:     atomic unit of work
//! ```
//!
//! Error policies are decorators ([`log_errors`], [`pause_on_failure`])
//! applied to tasks when the tables are built.

mod metrics;
mod phase;
#[allow(clippy::module_inception)]
mod pipeline;
mod policy;
mod task;

pub use metrics::{PhaseMetrics, SequenceMetrics, TaskMetrics, TaskOutcome};
pub use phase::{ExecutionMode, Phase, PhasePolicy, PhasePredicate};
pub use pipeline::SequenceExecutor;
pub use policy::{LogErrors, PauseOnFailure, log_errors, pause_on_failure, pause_on_failure_for};
pub use task::{BoxedTask, Task};

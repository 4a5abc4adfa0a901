//! machined: the lifecycle sequencer of a container-optimized node OS.
//!
//! A [`Sequencer`] resolves a lifecycle [`Sequence`] (boot, install,
//! upgrade, reset, shutdown, ...) to a static table of phases and runs it
//! against a [`Runtime`], the handle through which tasks reach the service
//! supervisor, the cluster, the container runtime and the host.

pub mod bootloader;
pub mod conditions;
pub mod context;
pub mod events;
pub mod fs;
pub mod install;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod runtime;
pub mod sequencer;
pub mod tasks;
pub mod util;

#[cfg(test)]
mod testing;

pub use machined_shared::{MachinedError, MachinedResult, RebootCmd};

pub use context::{Canceller, ExecutionContext};
pub use events::{Event, EventBus, EventKind, EventStream};
pub use logging::init_logging;
pub use runtime::options::RuntimeOptions;
pub use runtime::state::{Platform, PlatformMode};
pub use runtime::{Runtime, RuntimeBuilder};
pub use sequencer::{
    RebootMode, RebootRequest, ResetRequest, Sequence, SequenceData, SequenceOutcome, Sequencer,
    UpgradeRequest,
};

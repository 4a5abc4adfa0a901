//! Lifecycle tasks.
//!
//! Each task is a small struct implementing [`Task`]; the phase tables in
//! [`crate::sequencer`] compose them. Tasks reach the host only through the
//! [`Runtime`](crate::runtime::Runtime) collaborators.

mod cluster;
mod config;
mod disk;
mod install;
mod mounts;
mod pods;
mod power;
mod services;

pub use cluster::{CordonAndDrainNode, LabelNodeAsControlPlane, LeaveEtcd, UncordonNode};
pub use config::{LoadConfig, SaveConfig, ValidateConfig};
pub use disk::{ResetSystemDisk, ResetSystemDiskSpec, VerifyDiskAvailability};
pub use install::{Install, StageUpgrade, UpdateBootloader, Upgrade};
pub use mounts::{
    ForceCleanup, MountPartition, MountStatePartition, SaveStateEncryptionConfig,
    UnmountPartition, UnmountPodMounts, UnmountSystemDiskBindMounts,
};
pub use pods::{RemoveAllPods, StopAllPods};
pub use power::{KexecPrepare, Reboot, Shutdown};
pub use services::{
    StartAllServices, StartDBus, StopAllServices, StopDBus, StopServicesEphemeral,
};

use crate::pipeline::{BoxedTask, Task};
use std::sync::Arc;

/// Box a task for a phase table.
pub fn task<T: Task + 'static>(task: T) -> BoxedTask {
    Arc::new(task)
}

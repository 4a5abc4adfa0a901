//! Narrow interfaces to the subsystems the sequencer drives.
//!
//! Everything here is implemented outside this crate (or by the host
//! implementations in [`crate::fs`], [`crate::util`] and [`crate::bootloader`]).
//! Tasks reach them only through the [`Runtime`](super::Runtime) handle.

use crate::install::InstallOptions;
use crate::runtime::config::{ClusterSection, EncryptionConfig};
use async_trait::async_trait;
use machined_shared::MachinedResult;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// CLUSTER
// ============================================================================

/// Client for the cluster control plane API.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Mark the node unschedulable and evict its workloads.
    async fn cordon_and_drain(&self, node: &str) -> MachinedResult<()>;

    async fn uncordon(&self, node: &str, force: bool) -> MachinedResult<()>;

    async fn wait_until_ready(&self, node: &str) -> MachinedResult<()>;

    async fn label_node_as_control_plane(&self, node: &str, taint: bool) -> MachinedResult<()>;
}

#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Client authenticated with the kubelet's own credentials.
    async fn kubelet_client(&self) -> MachinedResult<Arc<dyn NodeClient>>;

    /// Short-lived admin client built from the cluster CA.
    async fn admin_client(&self, cluster: &ClusterSection) -> MachinedResult<Arc<dyn NodeClient>>;
}

/// Client for the membership store (etcd).
#[async_trait]
pub trait MembershipClient: Send + Sync {
    /// Remove this node from the member list.
    async fn leave_cluster(&self, require_leader: bool) -> MachinedResult<()>;
}

#[async_trait]
pub trait MembershipConnector: Send + Sync {
    async fn connect(&self) -> MachinedResult<Arc<dyn MembershipClient>>;
}

// ============================================================================
// WORKLOADS
// ============================================================================

/// Network namespace mode of a pod sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceMode {
    Pod,
    Container,
    Node,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAction {
    StopOnly,
    StopAndRemove,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Stop (and optionally remove) sandboxes whose network mode is in
    /// `modes`. An empty filter matches every sandbox.
    async fn stop_and_remove_pod_sandboxes(
        &self,
        action: StopAction,
        modes: &[NamespaceMode],
    ) -> MachinedResult<()>;
}

/// Kubelet lifecycle resource guarded by workload finalizers.
#[async_trait]
pub trait WorkloadLifecycle: Send + Sync {
    /// Begin teardown; `true` once no finalizers remain.
    async fn teardown(&self) -> MachinedResult<bool>;

    async fn wait_finalizers_empty(&self) -> MachinedResult<()>;

    async fn destroy(&self) -> MachinedResult<()>;
}

/// Logind-style inhibitor locks held by local agents.
#[async_trait]
pub trait ShutdownInhibitor: Send + Sync {
    fn start(&self) -> MachinedResult<()>;

    fn stop(&self) -> MachinedResult<()>;

    /// Resolve once every inhibit lock is released.
    async fn wait_shutdown(&self) -> MachinedResult<()>;
}

// ============================================================================
// INSTALLER
// ============================================================================

/// One invocation of the installer container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerRun {
    pub disk: String,
    pub platform: String,
    pub image: String,
    pub options: InstallOptions,
}

#[async_trait]
pub trait Installer: Send + Sync {
    async fn run(&self, run: &InstallerRun) -> MachinedResult<()>;
}

// ============================================================================
// CONFIG SOURCE
// ============================================================================

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch machine config from the platform. Returns
    /// `MachinedError::NoConfigSource` when the platform has none.
    async fn fetch(&self) -> MachinedResult<Vec<u8>>;

    /// Block until an operator submits config through the maintenance API.
    async fn receive_via_maintenance(&self) -> MachinedResult<Vec<u8>>;
}

// ============================================================================
// DISKS & PARTITIONS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MountOptions {
    pub skip_if_mounted: bool,
    pub skip_if_no_filesystem: bool,
    pub resize: bool,
    pub encryption: Option<EncryptionConfig>,
}

#[async_trait]
pub trait SystemPartitions: Send + Sync {
    async fn mount(&self, label: &str, options: &MountOptions) -> MachinedResult<()>;

    async fn unmount(&self, label: &str) -> MachinedResult<()>;
}

/// A system disk partition to wipe during a targeted reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetTarget {
    pub label: String,
    #[serde(default)]
    pub wipe: bool,
}

impl std::fmt::Display for ResetTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}

pub trait BlockDevices: Send + Sync {
    /// Wipe the partition table and signatures of the whole device.
    fn reset(&self, device: &str) -> MachinedResult<()>;

    /// Recreate the filesystem of one partition.
    fn format(&self, device: &str, target: &ResetTarget) -> MachinedResult<()>;

    fn partition_path(&self, device: &str, index: u32) -> MachinedResult<PathBuf> {
        crate::fs::partition_path(device, index)
    }

    /// Probe exclusive access by opening with `O_EXCL`.
    fn try_lock_exclusive(&self, path: &Path) -> Result<(), Errno> {
        crate::fs::probe_exclusive(path)
    }
}

// ============================================================================
// HOST
// ============================================================================

pub trait ProcessReaper: Send + Sync {
    fn kill_all(&self) -> MachinedResult<()>;
}

pub trait KexecLoader: Send + Sync {
    /// Stage `kernel` and `initrd` for the next reboot.
    fn load(&self, kernel: &File, initrd: &File, cmdline: &str) -> Result<(), Errno>;
}

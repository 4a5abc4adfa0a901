//! Shared runtime handle.
//!
//! [`Runtime`] is what every task sees: options, the loaded machine config,
//! machine and platform state, the event bus and the collaborator
//! interfaces. It is read-shared by all tasks of a phase; the only mutations
//! go through internally synchronized setters.

pub mod collaborators;
pub mod config;
pub mod constants;
pub mod options;
pub mod services;
pub mod state;

use crate::bootloader::meta::{MetaStore, SqliteMetaStore};
use crate::events::{Event, EventBus, EventKind};
use crate::fs::{HostMountTable, MountTable};
use crate::util::{HostKexecLoader, ProcfsReaper};
use collaborators::{
    BlockDevices, ClusterConnector, ConfigSource, ContainerRuntime, Installer, KexecLoader,
    MembershipConnector, ProcessReaper, ShutdownInhibitor, SystemPartitions, WorkloadLifecycle,
};
use config::MachineConfig;
use machined_shared::{MachinedError, MachinedResult};
use options::RuntimeOptions;
use parking_lot::RwLock;
use services::ServiceSupervisor;
use state::{MachineState, Platform, PlatformMode};
use std::sync::Arc;

pub use collaborators::{InstallerRun, MountOptions, NamespaceMode, ResetTarget, StopAction};
pub use config::MachineType;
pub use services::{ServiceState, StateEvent, SystemService};

/// Cheaply cloneable handle to the runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeImpl>,
}

struct RuntimeImpl {
    options: RuntimeOptions,
    platform: Platform,
    config: RwLock<Option<Arc<MachineConfig>>>,
    machine: MachineState,
    events: EventBus,
    services: Arc<dyn ServiceSupervisor>,
    cluster: Arc<dyn ClusterConnector>,
    membership: Arc<dyn MembershipConnector>,
    containers: Arc<dyn ContainerRuntime>,
    lifecycle: Arc<dyn WorkloadLifecycle>,
    inhibitor: Arc<dyn ShutdownInhibitor>,
    installer: Arc<dyn Installer>,
    config_source: Arc<dyn ConfigSource>,
    partitions: Arc<dyn SystemPartitions>,
    disks: Arc<dyn BlockDevices>,
    mounts: Arc<dyn MountTable>,
    reaper: Arc<dyn ProcessReaper>,
    kexec: Arc<dyn KexecLoader>,
    meta: Arc<dyn MetaStore>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("platform", &self.inner.platform)
            .field("installed", &self.inner.machine.installed())
            .field("has_config", &self.inner.config.read().is_some())
            .finish()
    }
}

impl Runtime {
    pub fn builder(options: RuntimeOptions, platform: Platform) -> RuntimeBuilder {
        RuntimeBuilder::new(options, platform)
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    pub fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    pub fn platform_mode(&self) -> PlatformMode {
        self.inner.platform.mode
    }

    pub fn machine(&self) -> &MachineState {
        &self.inner.machine
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Publish a lifecycle event.
    pub fn fire(&self, kind: EventKind, message: impl Into<String>) {
        self.inner.events.publish(Event::new(kind, message));
    }

    pub fn config(&self) -> Option<Arc<MachineConfig>> {
        self.inner.config.read().clone()
    }

    /// Loaded config, or an error for tasks that cannot run without one.
    pub fn require_config(&self) -> MachinedResult<Arc<MachineConfig>> {
        self.config()
            .ok_or_else(|| MachinedError::Config("machine config is not loaded".into()))
    }

    pub fn set_config(&self, config: MachineConfig) {
        *self.inner.config.write() = Some(Arc::new(config));
    }

    pub fn load_and_validate_config(&self, raw: &[u8]) -> MachinedResult<MachineConfig> {
        let config = MachineConfig::from_bytes(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Node name as registered with the cluster: the configured hostname,
    /// else the kernel hostname.
    pub fn node_name(&self) -> MachinedResult<String> {
        if let Some(config) = self.config()
            && let Some(hostname) = config.machine.hostname.as_deref()
            && !hostname.is_empty()
        {
            return Ok(hostname.to_string());
        }
        let hostname = nix::unistd::gethostname()
            .map_err(|e| MachinedError::Internal(format!("failed to read hostname: {}", e)))?;
        Ok(hostname.to_string_lossy().into_owned())
    }

    pub fn services(&self) -> &Arc<dyn ServiceSupervisor> {
        &self.inner.services
    }

    pub fn cluster(&self) -> &dyn ClusterConnector {
        self.inner.cluster.as_ref()
    }

    pub fn membership(&self) -> &dyn MembershipConnector {
        self.inner.membership.as_ref()
    }

    pub fn containers(&self) -> &dyn ContainerRuntime {
        self.inner.containers.as_ref()
    }

    pub fn lifecycle(&self) -> &dyn WorkloadLifecycle {
        self.inner.lifecycle.as_ref()
    }

    pub fn inhibitor(&self) -> &dyn ShutdownInhibitor {
        self.inner.inhibitor.as_ref()
    }

    pub fn installer(&self) -> &dyn Installer {
        self.inner.installer.as_ref()
    }

    pub fn config_source(&self) -> &dyn ConfigSource {
        self.inner.config_source.as_ref()
    }

    pub fn partitions(&self) -> &dyn SystemPartitions {
        self.inner.partitions.as_ref()
    }

    pub fn disks(&self) -> &dyn BlockDevices {
        self.inner.disks.as_ref()
    }

    pub fn mounts(&self) -> &dyn MountTable {
        self.inner.mounts.as_ref()
    }

    pub fn reaper(&self) -> &dyn ProcessReaper {
        self.inner.reaper.as_ref()
    }

    pub fn kexec(&self) -> &dyn KexecLoader {
        self.inner.kexec.as_ref()
    }

    pub fn meta(&self) -> &dyn MetaStore {
        self.inner.meta.as_ref()
    }

    /// Device name of the system disk.
    pub fn system_disk(&self) -> MachinedResult<String> {
        self.inner
            .machine
            .system_disk()
            .ok_or_else(|| MachinedError::InvalidState("system disk is not known".into()))
    }
}

/// Assembles a [`Runtime`].
///
/// Remote collaborators must be supplied. Host-local ones (mount table,
/// process reaper, kexec loader, metadata store) default to the host
/// implementations.
pub struct RuntimeBuilder {
    options: RuntimeOptions,
    platform: Platform,
    installed: bool,
    system_disk: Option<String>,
    config: Option<MachineConfig>,
    events: Option<EventBus>,
    services: Option<Arc<dyn ServiceSupervisor>>,
    cluster: Option<Arc<dyn ClusterConnector>>,
    membership: Option<Arc<dyn MembershipConnector>>,
    containers: Option<Arc<dyn ContainerRuntime>>,
    lifecycle: Option<Arc<dyn WorkloadLifecycle>>,
    inhibitor: Option<Arc<dyn ShutdownInhibitor>>,
    installer: Option<Arc<dyn Installer>>,
    config_source: Option<Arc<dyn ConfigSource>>,
    partitions: Option<Arc<dyn SystemPartitions>>,
    disks: Option<Arc<dyn BlockDevices>>,
    mounts: Option<Arc<dyn MountTable>>,
    reaper: Option<Arc<dyn ProcessReaper>>,
    kexec: Option<Arc<dyn KexecLoader>>,
    meta: Option<Arc<dyn MetaStore>>,
}

macro_rules! setter {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: Arc<$ty>) -> Self {
            self.$name = Some(value);
            self
        }
    };
}

fn required<T: ?Sized>(value: Option<Arc<T>>, name: &str) -> MachinedResult<Arc<T>> {
    value.ok_or_else(|| MachinedError::Config(format!("runtime is missing collaborator: {}", name)))
}

impl RuntimeBuilder {
    pub fn new(options: RuntimeOptions, platform: Platform) -> Self {
        Self {
            options,
            platform,
            installed: false,
            system_disk: None,
            config: None,
            events: None,
            services: None,
            cluster: None,
            membership: None,
            containers: None,
            lifecycle: None,
            inhibitor: None,
            installer: None,
            config_source: None,
            partitions: None,
            disks: None,
            mounts: None,
            reaper: None,
            kexec: None,
            meta: None,
        }
    }

    /// Whether an installation was found on `system_disk`.
    pub fn installed(mut self, installed: bool, system_disk: Option<String>) -> Self {
        self.installed = installed;
        self.system_disk = system_disk;
        self
    }

    pub fn config(mut self, config: MachineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    setter!(services, dyn ServiceSupervisor);
    setter!(cluster, dyn ClusterConnector);
    setter!(membership, dyn MembershipConnector);
    setter!(containers, dyn ContainerRuntime);
    setter!(lifecycle, dyn WorkloadLifecycle);
    setter!(inhibitor, dyn ShutdownInhibitor);
    setter!(installer, dyn Installer);
    setter!(config_source, dyn ConfigSource);
    setter!(partitions, dyn SystemPartitions);
    setter!(disks, dyn BlockDevices);
    setter!(mounts, dyn MountTable);
    setter!(reaper, dyn ProcessReaper);
    setter!(kexec, dyn KexecLoader);
    setter!(meta, dyn MetaStore);

    pub fn build(self) -> MachinedResult<Runtime> {
        self.options.sanitize()?;

        let meta: Arc<dyn MetaStore> = match self.meta {
            Some(meta) => meta,
            None => Arc::new(SqliteMetaStore::open(&self.options.meta_db)?),
        };

        let machine = MachineState::new(self.installed, self.system_disk);
        if self.installed {
            machine.load_staged_install(meta.as_ref())?;
        }

        let inner = RuntimeImpl {
            platform: self.platform,
            config: RwLock::new(self.config.map(Arc::new)),
            machine,
            events: self.events.unwrap_or_default(),
            services: required(self.services, "services")?,
            cluster: required(self.cluster, "cluster")?,
            membership: required(self.membership, "membership")?,
            containers: required(self.containers, "containers")?,
            lifecycle: required(self.lifecycle, "lifecycle")?,
            inhibitor: required(self.inhibitor, "inhibitor")?,
            installer: required(self.installer, "installer")?,
            config_source: required(self.config_source, "config_source")?,
            partitions: required(self.partitions, "partitions")?,
            disks: required(self.disks, "disks")?,
            mounts: self
                .mounts
                .unwrap_or_else(|| Arc::new(HostMountTable::default()) as Arc<dyn MountTable>),
            reaper: self
                .reaper
                .unwrap_or_else(|| Arc::new(ProcfsReaper::default()) as Arc<dyn ProcessReaper>),
            kexec: self
                .kexec
                .unwrap_or_else(|| Arc::new(HostKexecLoader) as Arc<dyn KexecLoader>),
            meta,
            options: self.options,
        };

        tracing::debug!(
            platform = %inner.platform.name,
            mode = ?inner.platform.mode,
            installed = inner.machine.installed(),
            "Runtime assembled"
        );

        Ok(Runtime {
            inner: Arc::new(inner),
        })
    }
}

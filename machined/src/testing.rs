//! Capturing test doubles and a runtime harness for unit tests.

use crate::bootloader::SqliteMetaStore;
use crate::context::{Canceller, ExecutionContext};
use crate::events::{EventBus, EventKind, EventStream};
use crate::fs::{MountEntry, MountSource, MountTable, parse_mounts};
use crate::pipeline::{BoxedTask, Task};
use crate::runtime::collaborators::{
    BlockDevices, ClusterConnector, ConfigSource, ContainerRuntime, Installer, KexecLoader,
    MembershipClient, MembershipConnector, NodeClient, ProcessReaper, ShutdownInhibitor,
    SystemPartitions, WorkloadLifecycle,
};
use crate::runtime::config::{ClusterSection, MachineConfig};
use crate::runtime::options::RuntimeOptions;
use crate::runtime::services::{ServiceSnapshot, ServiceSupervisor};
use crate::runtime::state::{Platform, PlatformMode};
use crate::runtime::{
    InstallerRun, MountOptions, NamespaceMode, ResetTarget, Runtime, ServiceState, StopAction,
    SystemService,
};
use crate::sequencer::{Sequence, SequenceData};
use async_trait::async_trait;
use machined_shared::{MachinedError, MachinedResult};
use nix::errno::Errno;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub(crate) const WORKER_CONFIG: &str = r#"{
    "persist": true,
    "machine": {
        "type": "worker",
        "hostname": "worker-1",
        "install": { "disk": "/dev/sda" }
    }
}"#;

pub(crate) const CONTROL_PLANE_CONFIG: &str = r#"{
    "persist": true,
    "machine": {
        "type": "controlplane",
        "hostname": "cp-1",
        "install": { "disk": "/dev/sda" }
    },
    "cluster": { "endpoint": "https://10.0.0.1:6443" }
}"#;

pub(crate) const ENCRYPTED_CONFIG: &str = r#"{
    "persist": true,
    "machine": {
        "type": "worker",
        "hostname": "worker-1",
        "install": { "disk": "/dev/sda" },
        "system_disk_encryption": {
            "STATE": { "provider": "luks2", "keys": [{ "slot": 0, "node_id": true }] }
        }
    }
}"#;

pub(crate) fn config_from(raw: &str) -> MachineConfig {
    MachineConfig::from_bytes(raw.as_bytes()).unwrap()
}

/// Everything published so far, kinds only.
pub(crate) fn drain_events(events: &mut EventStream) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

// ============================================================================
// HARNESS
// ============================================================================

/// Runtime wired to capturing fakes, with every path inside a temp dir.
///
/// Each `runtime()`/`context()` call builds a fresh [`Runtime`] over the
/// same fakes, event bus and metadata store, which is how a reboot looks to the code
/// under test.
pub(crate) struct TestRuntime {
    _dir: TempDir,
    pub options: RuntimeOptions,
    pub platform: Platform,
    pub installed: bool,
    pub system_disk: Option<String>,
    pub config: Option<MachineConfig>,
    pub services: Arc<FakeSupervisor>,
    pub cluster: Arc<FakeCluster>,
    pub membership: Arc<FakeMembership>,
    pub containers: Arc<FakeContainers>,
    pub lifecycle: Arc<FakeLifecycle>,
    pub inhibitor: Arc<FakeInhibitor>,
    pub installer: Arc<FakeInstaller>,
    pub config_source: Arc<FakeConfigSource>,
    pub partitions: Arc<FakePartitions>,
    pub disks: Arc<FakeDisks>,
    pub mounts: Arc<FakeMountTable>,
    pub reaper: Arc<FakeReaper>,
    pub kexec: Arc<FakeKexec>,
    pub meta: Arc<SqliteMetaStore>,
    pub events: EventBus,
}

impl TestRuntime {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let options = RuntimeOptions {
            config_path: root.join("state/config.json"),
            kubelet_client_cert: root.join("kubelet/kubelet-client-current.pem"),
            etcd_data_path: root.join("etcd"),
            ephemeral_mount_point: root.join("var"),
            boot_mount_point: root.join("boot"),
            grub_config: root.join("boot/grub/grub.cfg"),
            kernel_cmdline: root.join("cmdline"),
            meta_db: root.join("meta/meta.db"),
            log_dir: None,
            pause_on_failure: Duration::from_secs(300),
            progress_interval: Duration::from_secs(15),
            boot_timeout: Duration::from_secs(120),
            lifecycle_finalizers_timeout: Duration::from_secs(30),
            kubelet_shutdown_grace: Duration::from_secs(30),
            pod_teardown_timeout: Duration::from_secs(180),
            config_fetch_timeout: Duration::from_secs(70),
            node_ready_timeout: Duration::from_secs(60),
            service_poll_interval: Duration::from_millis(100),
        };
        std::fs::create_dir_all(root.join("state")).unwrap();

        let meta = Arc::new(SqliteMetaStore::open(&options.meta_db).unwrap());
        let disks = Arc::new(FakeDisks::new(root.join("dev")));

        Self {
            options,
            platform: Platform::new("metal", PlatformMode::Metal),
            installed: true,
            system_disk: Some("/dev/sda".into()),
            config: Some(config_from(WORKER_CONFIG)),
            services: Arc::default(),
            cluster: Arc::default(),
            membership: Arc::default(),
            containers: Arc::default(),
            lifecycle: Arc::default(),
            inhibitor: Arc::default(),
            installer: Arc::default(),
            config_source: Arc::default(),
            partitions: Arc::default(),
            disks,
            mounts: Arc::default(),
            reaper: Arc::default(),
            kexec: Arc::default(),
            meta,
            events: EventBus::default(),
            _dir: dir,
        }
    }

    pub fn installed(mut self, installed: bool, system_disk: Option<&str>) -> Self {
        self.installed = installed;
        self.system_disk = system_disk.map(str::to_string);
        self
    }

    pub fn with_config(mut self, config: MachineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn without_config(mut self) -> Self {
        self.config = None;
        self
    }

    pub fn platform_mode(mut self, mode: PlatformMode) -> Self {
        self.platform.mode = mode;
        self
    }

    pub fn with_mounts(self, raw: &str) -> Self {
        self.mounts.replace(raw);
        self
    }

    /// Write the kubelet client certificate, as a node that joined would have.
    pub fn join_cluster(&self) {
        let cert = &self.options.kubelet_client_cert;
        std::fs::create_dir_all(cert.parent().unwrap()).unwrap();
        std::fs::write(cert, b"cert").unwrap();
    }

    pub fn runtime(&self) -> Runtime {
        let mut builder = Runtime::builder(self.options.clone(), self.platform.clone())
            .installed(self.installed, self.system_disk.clone())
            .services(self.services.clone())
            .cluster(self.cluster.clone())
            .membership(self.membership.clone())
            .containers(self.containers.clone())
            .lifecycle(self.lifecycle.clone())
            .inhibitor(self.inhibitor.clone())
            .installer(self.installer.clone())
            .config_source(self.config_source.clone())
            .partitions(self.partitions.clone())
            .disks(self.disks.clone())
            .mounts(self.mounts.clone())
            .reaper(self.reaper.clone())
            .kexec(self.kexec.clone())
            .meta(self.meta.clone())
            .events(self.events.clone());
        if let Some(config) = &self.config {
            builder = builder.config(config.clone());
        }
        builder.build().unwrap()
    }

    pub fn context(&self) -> (ExecutionContext, Canceller) {
        self.context_for(Sequence::Boot, SequenceData::None)
    }

    pub fn context_for(&self, sequence: Sequence, data: SequenceData) -> (ExecutionContext, Canceller) {
        ExecutionContext::new(self.runtime(), sequence, data)
    }
}

// ============================================================================
// SERVICES
// ============================================================================

#[derive(Default)]
pub(crate) struct FakeSupervisor {
    states: Mutex<HashMap<String, ServiceState>>,
    order: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    manual: AtomicBool,
    shutdown_fails: AtomicBool,
}

impl FakeSupervisor {
    pub fn set_state(&self, id: &str, state: ServiceState) {
        let mut states = self.states.lock();
        if states.insert(id.to_string(), state).is_none() {
            self.order.lock().push(id.to_string());
        }
    }

    /// When disabled, started services stay in `Preparing` until
    /// `set_state` moves them.
    pub fn set_auto_run(&self, enabled: bool) {
        self.manual.store(!enabled, Ordering::SeqCst);
    }

    pub fn fail_shutdown(&self) {
        self.shutdown_fails.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ServiceSupervisor for FakeSupervisor {
    async fn load(&self, service: SystemService) -> MachinedResult<()> {
        self.record(format!("load:{}", service.id()));
        if !self.states.lock().contains_key(service.id()) {
            self.set_state(service.id(), ServiceState::Waiting);
        }
        Ok(())
    }

    async fn load_and_start(&self, service: SystemService) -> MachinedResult<()> {
        self.record(format!("start:{}", service.id()));
        let state = if self.manual.load(Ordering::SeqCst) {
            ServiceState::Preparing
        } else {
            ServiceState::Running
        };
        self.set_state(service.id(), state);
        Ok(())
    }

    async fn stop(&self, id: &str) -> MachinedResult<()> {
        self.record(format!("stop:{}", id));
        if let Some(state) = self.states.lock().get_mut(id) {
            *state = ServiceState::Finished;
        }
        Ok(())
    }

    async fn stop_with_reverse_dependencies(&self, ids: &[&str]) -> MachinedResult<()> {
        self.record(format!("stop_rdeps:{}", ids.join(",")));
        Ok(())
    }

    async fn shutdown(&self) -> MachinedResult<()> {
        self.record("shutdown".into());
        if self.shutdown_fails.load(Ordering::SeqCst) {
            return Err(MachinedError::Service("shutdown failed".into()));
        }
        Ok(())
    }

    fn list(&self) -> Vec<ServiceSnapshot> {
        let states = self.states.lock();
        self.order
            .lock()
            .iter()
            .filter_map(|id| {
                states.get(id).map(|state| ServiceSnapshot {
                    id: id.clone(),
                    state: *state,
                })
            })
            .collect()
    }

    fn state(&self, id: &str) -> Option<ServiceState> {
        self.states.lock().get(id).copied()
    }
}

// ============================================================================
// CLUSTER
// ============================================================================

#[derive(Default)]
struct ClusterLog {
    calls: Mutex<Vec<String>>,
    label_failures: AtomicU32,
}

/// Fails `counter` more times; `u32::MAX` fails forever.
fn take_failure(counter: &AtomicU32) -> bool {
    let left = counter.load(Ordering::SeqCst);
    if left == 0 {
        return false;
    }
    if left != u32::MAX {
        counter.fetch_sub(1, Ordering::SeqCst);
    }
    true
}

#[derive(Default)]
pub(crate) struct FakeCluster {
    log: Arc<ClusterLog>,
    kubelet_failures: AtomicU32,
    kubelet_attempts: AtomicU32,
}

impl FakeCluster {
    pub fn fail_kubelet_client(&self, times: u32) {
        self.kubelet_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_label(&self, times: u32) {
        self.log.label_failures.store(times, Ordering::SeqCst);
    }

    pub fn kubelet_client_attempts(&self) -> u32 {
        self.kubelet_attempts.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.calls.lock().clone()
    }
}

struct FakeNodeClient {
    log: Arc<ClusterLog>,
}

#[async_trait]
impl NodeClient for FakeNodeClient {
    async fn cordon_and_drain(&self, node: &str) -> MachinedResult<()> {
        self.log.calls.lock().push(format!("cordon_and_drain:{}", node));
        Ok(())
    }

    async fn uncordon(&self, node: &str, force: bool) -> MachinedResult<()> {
        self.log.calls.lock().push(format!("uncordon:{}:{}", node, force));
        Ok(())
    }

    async fn wait_until_ready(&self, node: &str) -> MachinedResult<()> {
        self.log.calls.lock().push(format!("wait_ready:{}", node));
        Ok(())
    }

    async fn label_node_as_control_plane(&self, node: &str, taint: bool) -> MachinedResult<()> {
        if take_failure(&self.log.label_failures) {
            return Err(MachinedError::Cluster(format!("node {} not found", node)));
        }
        self.log.calls.lock().push(format!("label:{}:{}", node, taint));
        Ok(())
    }
}

#[async_trait]
impl ClusterConnector for FakeCluster {
    async fn kubelet_client(&self) -> MachinedResult<Arc<dyn NodeClient>> {
        self.kubelet_attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.kubelet_failures) {
            return Err(MachinedError::Cluster("kubelet credentials not issued".into()));
        }
        Ok(Arc::new(FakeNodeClient {
            log: self.log.clone(),
        }))
    }

    async fn admin_client(&self, _cluster: &ClusterSection) -> MachinedResult<Arc<dyn NodeClient>> {
        Ok(Arc::new(FakeNodeClient {
            log: self.log.clone(),
        }))
    }
}

#[derive(Default)]
struct MembershipLog {
    leaves: Mutex<Vec<bool>>,
    leave_error: Mutex<Option<String>>,
}

#[derive(Default)]
pub(crate) struct FakeMembership {
    log: Arc<MembershipLog>,
    connects: AtomicU32,
}

impl FakeMembership {
    pub fn fail_leave(&self, message: &str) {
        *self.log.leave_error.lock() = Some(message.to_string());
    }

    /// `require_leader` of every successful leave.
    pub fn leaves(&self) -> Vec<bool> {
        self.log.leaves.lock().clone()
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

struct FakeMembershipClient {
    log: Arc<MembershipLog>,
}

#[async_trait]
impl MembershipClient for FakeMembershipClient {
    async fn leave_cluster(&self, require_leader: bool) -> MachinedResult<()> {
        if let Some(message) = self.log.leave_error.lock().clone() {
            return Err(MachinedError::Membership(message));
        }
        self.log.leaves.lock().push(require_leader);
        Ok(())
    }
}

#[async_trait]
impl MembershipConnector for FakeMembership {
    async fn connect(&self) -> MachinedResult<Arc<dyn MembershipClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeMembershipClient {
            log: self.log.clone(),
        }))
    }
}

// ============================================================================
// WORKLOADS
// ============================================================================

/// One `stop_and_remove_pod_sandboxes` call.
#[derive(Debug, Clone)]
pub(crate) struct SandboxPass {
    pub action: StopAction,
    pub modes: Vec<NamespaceMode>,
    pub matched: Vec<String>,
}

#[derive(Default)]
pub(crate) struct FakeContainers {
    sandboxes: Mutex<Vec<(String, NamespaceMode)>>,
    passes: Mutex<Vec<SandboxPass>>,
    error: Mutex<Option<String>>,
}

impl FakeContainers {
    pub fn add_sandbox(&self, name: &str, mode: NamespaceMode) {
        self.sandboxes.lock().push((name.to_string(), mode));
    }

    pub fn fail_with(&self, message: &str) {
        *self.error.lock() = Some(message.to_string());
    }

    pub fn passes(&self) -> Vec<SandboxPass> {
        self.passes.lock().clone()
    }

    pub fn remaining(&self) -> Vec<String> {
        self.sandboxes.lock().iter().map(|(name, _)| name.clone()).collect()
    }
}

#[async_trait]
impl ContainerRuntime for FakeContainers {
    async fn stop_and_remove_pod_sandboxes(
        &self,
        action: StopAction,
        modes: &[NamespaceMode],
    ) -> MachinedResult<()> {
        let selected = |mode: &NamespaceMode| modes.is_empty() || modes.contains(mode);

        let mut sandboxes = self.sandboxes.lock();
        let mut matched: Vec<String> = sandboxes
            .iter()
            .filter(|(_, mode)| selected(mode))
            .map(|(name, _)| name.clone())
            .collect();
        matched.sort();

        self.passes.lock().push(SandboxPass {
            action,
            modes: modes.to_vec(),
            matched,
        });

        if let Some(message) = self.error.lock().clone() {
            return Err(MachinedError::Service(message));
        }

        if action == StopAction::StopAndRemove {
            sandboxes.retain(|(_, mode)| !selected(mode));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeLifecycle {
    hang: AtomicBool,
    destroyed: AtomicU32,
}

impl FakeLifecycle {
    /// Finalizers never clear.
    pub fn hang_finalizers(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn destroyed(&self) -> u32 {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadLifecycle for FakeLifecycle {
    async fn teardown(&self) -> MachinedResult<bool> {
        Ok(!self.hang.load(Ordering::SeqCst))
    }

    async fn wait_finalizers_empty(&self) -> MachinedResult<()> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn destroy(&self) -> MachinedResult<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeInhibitor {
    calls: Mutex<Vec<String>>,
    stop_fails: AtomicBool,
    hang: AtomicBool,
}

impl FakeInhibitor {
    pub fn fail_stop(&self) {
        self.stop_fails.store(true, Ordering::SeqCst);
    }

    /// Inhibit locks are never released.
    pub fn hang_shutdown(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ShutdownInhibitor for FakeInhibitor {
    fn start(&self) -> MachinedResult<()> {
        self.calls.lock().push("start".into());
        Ok(())
    }

    fn stop(&self) -> MachinedResult<()> {
        self.calls.lock().push("stop".into());
        if self.stop_fails.load(Ordering::SeqCst) {
            return Err(MachinedError::Service("dbus not running".into()));
        }
        Ok(())
    }

    async fn wait_shutdown(&self) -> MachinedResult<()> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

// ============================================================================
// INSTALLER & CONFIG SOURCE
// ============================================================================

#[derive(Default)]
pub(crate) struct FakeInstaller {
    runs: Mutex<Vec<InstallerRun>>,
    error: Mutex<Option<String>>,
}

impl FakeInstaller {
    pub fn fail(&self, message: &str) {
        *self.error.lock() = Some(message.to_string());
    }

    /// Every invocation, failed ones included.
    pub fn runs(&self) -> Vec<InstallerRun> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn run(&self, run: &InstallerRun) -> MachinedResult<()> {
        self.runs.lock().push(run.clone());
        match self.error.lock().clone() {
            Some(message) => Err(MachinedError::Install(message)),
            None => Ok(()),
        }
    }
}

/// What the fake platform answers to a config fetch.
pub(crate) enum ConfigFetch {
    Bytes(Vec<u8>),
    NoSource,
    Fail(String),
}

pub(crate) struct FakeConfigSource {
    fetch: Mutex<ConfigFetch>,
    maintenance: Mutex<Option<Vec<u8>>>,
    fetches: AtomicU32,
}

impl Default for FakeConfigSource {
    fn default() -> Self {
        Self {
            fetch: Mutex::new(ConfigFetch::Bytes(WORKER_CONFIG.as_bytes().to_vec())),
            maintenance: Mutex::new(None),
            fetches: AtomicU32::new(0),
        }
    }
}

impl FakeConfigSource {
    pub fn set_fetch(&self, fetch: ConfigFetch) {
        *self.fetch.lock() = fetch;
    }

    pub fn set_maintenance(&self, raw: Vec<u8>) {
        *self.maintenance.lock() = Some(raw);
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigSource for FakeConfigSource {
    async fn fetch(&self) -> MachinedResult<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &*self.fetch.lock() {
            ConfigFetch::Bytes(raw) => Ok(raw.clone()),
            ConfigFetch::NoSource => Err(MachinedError::NoConfigSource),
            ConfigFetch::Fail(message) => Err(MachinedError::Config(message.clone())),
        }
    }

    async fn receive_via_maintenance(&self) -> MachinedResult<Vec<u8>> {
        self.maintenance
            .lock()
            .clone()
            .ok_or_else(|| MachinedError::Config("maintenance service closed".into()))
    }
}

// ============================================================================
// DISKS & MOUNTS
// ============================================================================

#[derive(Default)]
pub(crate) struct FakePartitions {
    mounts: Mutex<Vec<(String, MountOptions)>>,
    unmounts: Mutex<Vec<String>>,
}

impl FakePartitions {
    pub fn mounts(&self) -> Vec<(String, MountOptions)> {
        self.mounts.lock().clone()
    }

    pub fn unmounts(&self) -> Vec<String> {
        self.unmounts.lock().clone()
    }
}

#[async_trait]
impl SystemPartitions for FakePartitions {
    async fn mount(&self, label: &str, options: &MountOptions) -> MachinedResult<()> {
        self.mounts.lock().push((label.to_string(), options.clone()));
        Ok(())
    }

    async fn unmount(&self, label: &str) -> MachinedResult<()> {
        self.unmounts.lock().push(label.to_string());
        Ok(())
    }
}

/// Block devices whose partition nodes are plain files under a temp dir.
pub(crate) struct FakeDisks {
    dev_dir: PathBuf,
    resets: Mutex<Vec<String>>,
    formats: Mutex<Vec<String>>,
    format_failure: Mutex<Option<String>>,
    lock_results: Mutex<VecDeque<Errno>>,
    always_busy: AtomicBool,
    lock_attempts: AtomicU32,
}

impl FakeDisks {
    fn new(dev_dir: PathBuf) -> Self {
        Self {
            dev_dir,
            resets: Mutex::default(),
            formats: Mutex::default(),
            format_failure: Mutex::default(),
            lock_results: Mutex::default(),
            always_busy: AtomicBool::new(false),
            lock_attempts: AtomicU32::new(0),
        }
    }

    /// Create the system disk's partition nodes.
    pub fn create_partitions(&self) {
        std::fs::create_dir_all(&self.dev_dir).unwrap();
        for index in 1..=3 {
            File::create(self.dev_dir.join(format!("sda{}", index))).unwrap();
        }
    }

    pub fn fail_format(&self, label: &str) {
        *self.format_failure.lock() = Some(label.to_string());
    }

    /// Errors returned by the next exclusive-open probes, in order.
    pub fn lock_results(&self, results: Vec<Errno>) {
        *self.lock_results.lock() = results.into();
    }

    pub fn always_busy(&self) {
        self.always_busy.store(true, Ordering::SeqCst);
    }

    pub fn lock_attempts(&self) -> u32 {
        self.lock_attempts.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> Vec<String> {
        self.resets.lock().clone()
    }

    /// Labels formatted successfully.
    pub fn formats(&self) -> Vec<String> {
        self.formats.lock().clone()
    }
}

impl BlockDevices for FakeDisks {
    fn reset(&self, device: &str) -> MachinedResult<()> {
        self.resets.lock().push(device.to_string());
        Ok(())
    }

    fn format(&self, _device: &str, target: &ResetTarget) -> MachinedResult<()> {
        if self.format_failure.lock().as_deref() == Some(target.label.as_str()) {
            return Err(MachinedError::Storage("device or resource busy".into()));
        }
        self.formats.lock().push(target.label.clone());
        Ok(())
    }

    fn partition_path(&self, device: &str, index: u32) -> MachinedResult<PathBuf> {
        let name = device.rsplit('/').next().unwrap_or(device);
        Ok(self.dev_dir.join(format!("{}{}", name, index)))
    }

    fn try_lock_exclusive(&self, _path: &Path) -> Result<(), Errno> {
        self.lock_attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_busy.load(Ordering::SeqCst) {
            return Err(Errno::EBUSY);
        }
        match self.lock_results.lock().pop_front() {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }
}

/// Mount table serving the same entries for both sources.
#[derive(Default)]
pub(crate) struct FakeMountTable {
    entries: Mutex<Vec<MountEntry>>,
    unmount_failures: Mutex<HashMap<PathBuf, Errno>>,
    detach_failures: Mutex<HashMap<PathBuf, Errno>>,
    unmounted: Mutex<Vec<PathBuf>>,
    detached: Mutex<Vec<PathBuf>>,
}

impl FakeMountTable {
    pub fn new(raw: &str) -> Self {
        let table = Self::default();
        table.replace(raw);
        table
    }

    pub fn replace(&self, raw: &str) {
        *self.entries.lock() = parse_mounts(raw);
    }

    pub fn fail_unmount(&self, target: &str, errno: Errno) {
        self.unmount_failures.lock().insert(PathBuf::from(target), errno);
    }

    pub fn fail_detach(&self, target: &str, errno: Errno) {
        self.detach_failures.lock().insert(PathBuf::from(target), errno);
    }

    /// Targets unmounted successfully, in call order.
    pub fn unmounted(&self) -> Vec<PathBuf> {
        self.unmounted.lock().clone()
    }

    pub fn detached(&self) -> Vec<PathBuf> {
        self.detached.lock().clone()
    }
}

impl MountTable for FakeMountTable {
    fn read(&self, _source: MountSource) -> MachinedResult<Vec<MountEntry>> {
        Ok(self.entries.lock().clone())
    }

    fn unmount(&self, target: &Path) -> Result<(), Errno> {
        if let Some(errno) = self.unmount_failures.lock().get(target) {
            return Err(*errno);
        }
        self.unmounted.lock().push(target.to_path_buf());
        Ok(())
    }

    fn detach(&self, target: &Path) -> Result<(), Errno> {
        if let Some(errno) = self.detach_failures.lock().get(target) {
            return Err(*errno);
        }
        self.detached.lock().push(target.to_path_buf());
        Ok(())
    }

    fn dump(&self) -> MachinedResult<String> {
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|e| format!("{} {} {}", e.source, e.target.display(), e.fstype))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

// ============================================================================
// HOST
// ============================================================================

#[derive(Default)]
pub(crate) struct FakeReaper {
    kills: AtomicU32,
    fails: AtomicBool,
}

impl FakeReaper {
    pub fn fail(&self) {
        self.fails.store(true, Ordering::SeqCst);
    }

    pub fn kills(&self) -> u32 {
        self.kills.load(Ordering::SeqCst)
    }
}

impl ProcessReaper for FakeReaper {
    fn kill_all(&self) -> MachinedResult<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.fails.load(Ordering::SeqCst) {
            return Err(MachinedError::Internal("failed to kill 2 processes".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeKexec {
    cmdlines: Mutex<Vec<String>>,
    error: Mutex<Option<Errno>>,
}

impl FakeKexec {
    pub fn fail_with(&self, errno: Errno) {
        *self.error.lock() = Some(errno);
    }

    /// Command line of every load attempt.
    pub fn cmdlines(&self) -> Vec<String> {
        self.cmdlines.lock().clone()
    }
}

impl KexecLoader for FakeKexec {
    fn load(&self, _kernel: &File, _initrd: &File, cmdline: &str) -> Result<(), Errno> {
        self.cmdlines.lock().push(cmdline.to_string());
        match *self.error.lock() {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }
}

// ============================================================================
// TASKS
// ============================================================================

type TaskResultFn = Box<dyn Fn() -> MachinedResult<()> + Send + Sync>;

/// Task returning a fixed result.
pub(crate) struct FnTask {
    name: String,
    result: TaskResultFn,
}

impl FnTask {
    pub fn ok(name: &str) -> BoxedTask {
        Arc::new(Self {
            name: name.to_string(),
            result: Box::new(|| Ok(())),
        })
    }

    pub fn failing<F>(name: &str, err: F) -> BoxedTask
    where
        F: Fn() -> MachinedError + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            result: Box::new(move || Err(err())),
        })
    }
}

#[async_trait]
impl Task for FnTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &ExecutionContext) -> MachinedResult<()> {
        (self.result)()
    }
}

/// Records when sleeping tasks start and finish.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    started: Arc<Mutex<Vec<String>>>,
    finished: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn sleeping(&self, name: &str, duration: Duration) -> BoxedTask {
        Arc::new(SleepingTask {
            name: name.to_string(),
            duration,
            recorder: self.clone(),
        })
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().clone()
    }
}

struct SleepingTask {
    name: String,
    duration: Duration,
    recorder: Recorder,
}

#[async_trait]
impl Task for SleepingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        self.recorder.started.lock().push(self.name.clone());
        ctx.sleep(self.duration).await?;
        self.recorder.finished.lock().push(self.name.clone());
        Ok(())
    }
}

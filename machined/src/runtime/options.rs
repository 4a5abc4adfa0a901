//! Runtime options: filesystem locations and timing knobs.

use crate::runtime::constants::{paths, timeouts};
use machined_shared::{MachinedError, MachinedResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the sequencer finds things on the host, and how long it waits.
///
/// Every field has a production default; tests point the paths at a
/// temporary directory and shrink the timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    pub config_path: PathBuf,
    /// Presence of this file means the node has joined the cluster.
    pub kubelet_client_cert: PathBuf,
    /// Membership store data directory (contains `member/` once joined).
    pub etcd_data_path: PathBuf,
    pub ephemeral_mount_point: PathBuf,
    pub boot_mount_point: PathBuf,
    pub grub_config: PathBuf,
    pub kernel_cmdline: PathBuf,
    pub meta_db: PathBuf,
    pub log_dir: Option<PathBuf>,

    #[serde(with = "secs")]
    pub pause_on_failure: Duration,
    #[serde(with = "secs")]
    pub progress_interval: Duration,
    #[serde(with = "secs")]
    pub boot_timeout: Duration,
    #[serde(with = "secs")]
    pub lifecycle_finalizers_timeout: Duration,
    #[serde(with = "secs")]
    pub kubelet_shutdown_grace: Duration,
    #[serde(with = "secs")]
    pub pod_teardown_timeout: Duration,
    #[serde(with = "secs")]
    pub config_fetch_timeout: Duration,
    #[serde(with = "secs")]
    pub node_ready_timeout: Duration,
    /// How often service conditions re-read supervisor state.
    #[serde(with = "millis")]
    pub service_poll_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(paths::CONFIG),
            kubelet_client_cert: PathBuf::from(paths::KUBELET_CLIENT_CERT),
            etcd_data_path: PathBuf::from(paths::ETCD_DATA),
            ephemeral_mount_point: PathBuf::from(paths::EPHEMERAL_MOUNT_POINT),
            boot_mount_point: PathBuf::from(paths::BOOT_MOUNT_POINT),
            grub_config: PathBuf::from(paths::GRUB_CONFIG),
            kernel_cmdline: PathBuf::from(paths::KERNEL_CMDLINE),
            meta_db: PathBuf::from(paths::META_DB),
            log_dir: Some(PathBuf::from(paths::LOG_DIR)),
            pause_on_failure: Duration::from_secs(timeouts::PAUSE_ON_FAILURE_SECS),
            progress_interval: Duration::from_secs(timeouts::PROGRESS_INTERVAL_SECS),
            boot_timeout: Duration::from_secs(timeouts::BOOT_SECS),
            lifecycle_finalizers_timeout: Duration::from_secs(
                timeouts::LIFECYCLE_FINALIZERS_SECS,
            ),
            kubelet_shutdown_grace: Duration::from_secs(timeouts::KUBELET_SHUTDOWN_GRACE_SECS),
            pod_teardown_timeout: Duration::from_secs(timeouts::POD_TEARDOWN_SECS),
            config_fetch_timeout: Duration::from_secs(timeouts::CONFIG_FETCH_SECS),
            node_ready_timeout: Duration::from_secs(timeouts::NODE_READY_SECS),
            service_poll_interval: Duration::from_millis(500),
        }
    }
}

impl RuntimeOptions {
    /// Load options from a JSON file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> MachinedResult<Self> {
        let raw = std::fs::read(path).map_err(|e| {
            MachinedError::Config(format!(
                "Failed to read runtime options {}: {}",
                path.display(),
                e
            ))
        })?;
        let options: RuntimeOptions = serde_json::from_slice(&raw)?;
        options.sanitize()?;
        Ok(options)
    }

    /// Reject option sets that would make waits spin or never end.
    pub fn sanitize(&self) -> MachinedResult<()> {
        if self.service_poll_interval.is_zero() {
            return Err(MachinedError::Config(
                "service_poll_interval must be non-zero".into(),
            ));
        }
        if self.progress_interval.is_zero() {
            return Err(MachinedError::Config(
                "progress_interval must be non-zero".into(),
            ));
        }
        for path in [&self.config_path, &self.meta_db, &self.grub_config] {
            if !path.is_absolute() {
                return Err(MachinedError::Config(format!(
                    "path must be absolute, got: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

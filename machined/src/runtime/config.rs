//! Machine configuration document.
//!
//! Loading and validation proper belong to the configuration subsystem; the
//! sequencer only needs the handful of fields below.

use crate::runtime::constants::{DEFAULT_INSTALLER_IMAGE, partitions};
use machined_shared::{MachinedError, MachinedResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of this machine in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    /// First control-plane node; bootstraps the membership store.
    Init,
    #[serde(rename = "controlplane")]
    ControlPlane,
    Worker,
    #[serde(other)]
    Unknown,
}

impl MachineType {
    pub fn is_control_plane(self) -> bool {
        matches!(self, MachineType::Init | MachineType::ControlPlane)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Keep the config on the state partition and reuse it on next boot.
    #[serde(default = "default_true")]
    pub persist: bool,
    pub machine: MachineSection,
    #[serde(default)]
    pub cluster: ClusterSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSection {
    #[serde(rename = "type")]
    pub machine_type: MachineType,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub install: InstallSection,
    /// Encryption settings keyed by partition label.
    #[serde(default)]
    pub system_disk_encryption: HashMap<String, EncryptionConfig>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallSection {
    #[serde(default)]
    pub disk: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub zero: bool,
    #[serde(default)]
    pub extra_kernel_args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSection {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub schedule_on_control_planes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub provider: String,
    #[serde(default)]
    pub cipher: Option<String>,
    #[serde(default)]
    pub keys: Vec<EncryptionKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub slot: u32,
    #[serde(default)]
    pub node_id: bool,
    #[serde(default)]
    pub static_passphrase: Option<String>,
}

fn default_true() -> bool {
    true
}

impl MachineConfig {
    pub fn from_bytes(raw: &[u8]) -> MachinedResult<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| MachinedError::Config(format!("failed to parse machine config: {}", e)))
    }

    pub fn to_bytes(&self) -> MachinedResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Structural checks the sequencer relies on.
    pub fn validate(&self) -> MachinedResult<()> {
        if self.machine.machine_type == MachineType::Unknown {
            return Err(MachinedError::Config("unknown machine type".into()));
        }
        if self.machine.machine_type.is_control_plane() && self.cluster.endpoint.is_none() {
            return Err(MachinedError::Config(
                "control plane machines require cluster.endpoint".into(),
            ));
        }
        if let Some(disk) = &self.machine.install.disk
            && !disk.starts_with("/dev/")
        {
            return Err(MachinedError::Config(format!(
                "install disk must be a device path, got: {}",
                disk
            )));
        }
        for label in self.machine.system_disk_encryption.keys() {
            if label != partitions::STATE && label != partitions::EPHEMERAL {
                return Err(MachinedError::Config(format!(
                    "encryption is only supported for {} and {}, got: {}",
                    partitions::STATE,
                    partitions::EPHEMERAL,
                    label
                )));
            }
        }
        Ok(())
    }

    pub fn install_image(&self) -> &str {
        self.machine
            .install
            .image
            .as_deref()
            .filter(|image| !image.is_empty())
            .unwrap_or(DEFAULT_INSTALLER_IMAGE)
    }

    pub fn install_disk(&self) -> MachinedResult<&str> {
        self.machine
            .install
            .disk
            .as_deref()
            .ok_or_else(|| MachinedError::Config("machine.install.disk is not set".into()))
    }

    pub fn encryption_for(&self, label: &str) -> Option<&EncryptionConfig> {
        self.machine.system_disk_encryption.get(label)
    }
}

//! Install/upgrade decision logic and the options record handed to the
//! installer container.
//!
//! ```text
//! not installed             -> Fresh         (config image, config disk)
//! installed + staged        -> ApplyStaged   (staged image, staged options)
//! installed, nothing staged -> error: Upgrade sequence owns this case
//! ```

use crate::bootloader::meta::{MetaStore, MetaTag};
use crate::runtime::config::MachineConfig;
use crate::runtime::state::{MachineState, StagedInstall};
use crate::sequencer::UpgradeRequest;
use machined_shared::{MachinedError, MachinedResult};
use serde::{Deserialize, Serialize};

/// Flags passed to the installer. Persisted as JSON across a staged upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallOptions {
    /// Overwrite an existing installation.
    pub force: bool,
    /// Zero the target disk before partitioning.
    pub zero: bool,
    pub upgrade: bool,
    /// Keep the ephemeral partition across the upgrade.
    pub preserve: bool,
    /// Pull the installer image before running it.
    pub pull: bool,
    pub extra_kernel_args: Vec<String>,
    /// Partitions to rewrite; empty means all.
    pub partition_targets: Vec<String>,
}

impl InstallOptions {
    pub fn fresh_install(config: &MachineConfig) -> Self {
        Self {
            force: true,
            zero: config.machine.install.zero,
            pull: true,
            extra_kernel_args: config.machine.install.extra_kernel_args.clone(),
            ..Default::default()
        }
    }

    pub fn from_upgrade_request(request: &UpgradeRequest, config: Option<&MachineConfig>) -> Self {
        Self {
            force: request.force,
            upgrade: true,
            preserve: request.preserve,
            // The image was already pulled when the request was accepted.
            pull: false,
            extra_kernel_args: config
                .map(|c| c.machine.install.extra_kernel_args.clone())
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    pub fn to_bytes(&self) -> MachinedResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(raw: &[u8]) -> MachinedResult<Self> {
        serde_json::from_slice(raw).map_err(|e| {
            MachinedError::Install(format!("error unserializing install options: {}", e))
        })
    }
}

/// Branch the Install task takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallAction {
    Fresh,
    ApplyStaged(StagedInstall),
}

impl InstallAction {
    pub fn decide(state: &MachineState) -> MachinedResult<Self> {
        if !state.installed() {
            return Ok(InstallAction::Fresh);
        }
        match state.staged_install() {
            Some(staged) => Ok(InstallAction::ApplyStaged(staged)),
            None => Err(MachinedError::Install(
                "unsupported configuration for install task".into(),
            )),
        }
    }
}

/// Persist an install to run on the next boot.
pub fn stage_install(
    meta: &dyn MetaStore,
    image_ref: &str,
    options: &InstallOptions,
) -> MachinedResult<()> {
    meta.write_tag(MetaTag::StagedInstallImageRef, image_ref.as_bytes())?;
    meta.write_tag(MetaTag::StagedInstallOptions, &options.to_bytes()?)?;
    tracing::info!(image = %image_ref, "Staged install for next boot");
    Ok(())
}

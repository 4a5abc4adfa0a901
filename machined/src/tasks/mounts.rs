//! Tasks: system partition mounts and mount-table cleanup.

use crate::bootloader::MetaTag;
use crate::context::ExecutionContext;
use crate::fs::{MountSource, force_unmount_all, unmount_matching};
use crate::pipeline::Task;
use crate::runtime::MountOptions;
use crate::runtime::config::EncryptionConfig;
use crate::runtime::constants::partitions;
use crate::sequencer::Sequence;
use async_trait::async_trait;
use machined_shared::{MachinedError, MachinedResult};

/// Mount a system partition by label, skipping it if already mounted.
pub struct MountPartition {
    label: &'static str,
    name: &'static str,
    resize: bool,
}

impl MountPartition {
    pub fn boot() -> Self {
        Self {
            label: partitions::BOOT,
            name: "mount_boot_partition",
            resize: false,
        }
    }

    /// The ephemeral partition grows to fill the disk on every mount.
    pub fn ephemeral() -> Self {
        Self {
            label: partitions::EPHEMERAL,
            name: "mount_ephemeral_partition",
            resize: true,
        }
    }
}

#[async_trait]
impl Task for MountPartition {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let encryption = rt
            .config()
            .and_then(|config| config.encryption_for(self.label).cloned());

        let options = MountOptions {
            skip_if_mounted: true,
            resize: self.resize,
            encryption,
            ..Default::default()
        };
        ctx.bound(rt.partitions().mount(self.label, &options)).await
    }
}

pub struct UnmountPartition {
    label: &'static str,
    name: &'static str,
}

impl UnmountPartition {
    pub fn boot() -> Self {
        Self {
            label: partitions::BOOT,
            name: "unmount_boot_partition",
        }
    }

    pub fn state() -> Self {
        Self {
            label: partitions::STATE,
            name: "unmount_state_partition",
        }
    }

    pub fn ephemeral() -> Self {
        Self {
            label: partitions::EPHEMERAL,
            name: "unmount_ephemeral_partition",
        }
    }
}

#[async_trait]
impl Task for UnmountPartition {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        ctx.bound(ctx.runtime().partitions().unmount(self.label)).await
    }
}

/// Mount the state partition.
///
/// Encryption comes from the machine config when one is loaded, else from
/// the copy saved in the metadata store (the config itself lives on this
/// partition). During `Initialize` a partition without a filesystem is
/// skipped rather than an error.
pub struct MountStatePartition;

impl MountStatePartition {
    fn encryption(ctx: &ExecutionContext) -> MachinedResult<Option<EncryptionConfig>> {
        let rt = ctx.runtime();
        if let Some(config) = rt.config() {
            return Ok(config.encryption_for(partitions::STATE).cloned());
        }

        match rt.meta().read_tag(MetaTag::StateEncryptionConfig)? {
            Some(raw) => serde_json::from_slice(&raw).map(Some).map_err(|e| {
                MachinedError::Storage(format!("failed to decode state encryption config: {}", e))
            }),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Task for MountStatePartition {
    fn name(&self) -> &str {
        "mount_state_partition"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let options = MountOptions {
            skip_if_mounted: true,
            skip_if_no_filesystem: ctx.sequence() == Sequence::Initialize,
            encryption: Self::encryption(ctx)?,
            ..Default::default()
        };
        ctx.bound(
            ctx.runtime()
                .partitions()
                .mount(partitions::STATE, &options),
        )
        .await
    }
}

/// Persist the state partition encryption config in the metadata store so
/// the partition can be opened before the machine config is readable.
pub struct SaveStateEncryptionConfig;

#[async_trait]
impl Task for SaveStateEncryptionConfig {
    fn name(&self) -> &str {
        "save_state_encryption_config"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let Some(config) = rt.config() else {
            return Ok(());
        };
        let Some(encryption) = config.encryption_for(partitions::STATE) else {
            return Ok(());
        };

        let raw = serde_json::to_vec(encryption)?;
        rt.meta().write_tag(MetaTag::StateEncryptionConfig, &raw)
    }
}

/// Unmount everything the workloads mounted under the ephemeral mount point.
pub struct UnmountPodMounts;

#[async_trait]
impl Task for UnmountPodMounts {
    fn name(&self) -> &str {
        "unmount_pod_mounts"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        // String prefix with trailing slash: "/var" itself is left alone.
        let prefix = format!("{}/", rt.options().ephemeral_mount_point.display());

        let count = unmount_matching(rt.mounts(), MountSource::Process, |entry| {
            entry.target.to_string_lossy().starts_with(&prefix)
        })?;

        tracing::debug!(count, "Unmounted pod mounts");
        Ok(())
    }
}

/// Unmount bind mounts of system disk partitions, leaving the whole-disk
/// device alone.
pub struct UnmountSystemDiskBindMounts;

#[async_trait]
impl Task for UnmountSystemDiskBindMounts {
    fn name(&self) -> &str {
        "unmount_system_disk_bind_mounts"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let devname = rt.system_disk()?;

        let count = unmount_matching(rt.mounts(), MountSource::System, |entry| {
            let device = entry.source.replace("/dev/mapper", "/dev");
            device.starts_with(&devname) && device != devname
        })?;

        tracing::debug!(count, device = %devname, "Unmounted system disk bind mounts");
        Ok(())
    }
}

/// Last-resort cleanup before power-off: kill what is left and detach every
/// block-device mount. Never fails.
pub struct ForceCleanup;

#[async_trait]
impl Task for ForceCleanup {
    fn name(&self) -> &str {
        "force_cleanup"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();

        if let Err(e) = rt.reaper().kill_all() {
            tracing::warn!(error = %e, "Error killing all procs");
        }

        if let Err(e) = force_unmount_all(rt.mounts()) {
            tracing::warn!(error = %e, "Error unmounting");
        }

        Ok(())
    }
}

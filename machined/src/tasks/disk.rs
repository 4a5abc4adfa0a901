//! Tasks: system disk reset and availability checks.

use crate::context::ExecutionContext;
use crate::pipeline::Task;
use crate::retry::RetryPolicy;
use crate::runtime::constants::{partitions, timeouts};
use async_trait::async_trait;
use machined_shared::{MachinedError, MachinedResult};
use nix::errno::Errno;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Wipe the whole system disk.
pub struct ResetSystemDisk;

#[async_trait]
impl Task for ResetSystemDisk {
    fn name(&self) -> &str {
        "reset_system_disk"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let devname = rt.system_disk()?;

        tracing::info!(device = %devname, "Resetting system disk");
        rt.disks().reset(&devname)
    }
}

/// Wipe only the partitions named by the reset request.
pub struct ResetSystemDiskSpec;

#[async_trait]
impl Task for ResetSystemDiskSpec {
    fn name(&self) -> &str {
        "reset_system_disk_spec"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let request = ctx.data().reset()?;
        let devname = rt.system_disk()?;

        for target in &request.system_disk_targets {
            if let Some(err) = ctx.err() {
                return Err(err);
            }

            rt.disks().format(&devname, target).map_err(|e| {
                MachinedError::Storage(format!("failed wiping partition {}: {}", target, e))
            })?;

            tracing::info!(partition = %target, "Wiped partition");
        }

        tracing::info!("Successfully reset system disk partitions");
        Ok(())
    }
}

/// Wait until nothing holds the ephemeral partition open.
///
/// The probe opens the partition exclusively; `EBUSY` is retried, any other
/// failure ends the wait.
pub struct VerifyDiskAvailability;

#[async_trait]
impl Task for VerifyDiskAvailability {
    fn name(&self) -> &str {
        "verify_disk_availability"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let devname = rt.system_disk()?;
        let partition = rt
            .disks()
            .partition_path(&devname, partitions::EPHEMERAL_INDEX)?;

        if !partition.exists() {
            return Err(MachinedError::Storage(format!(
                "ephemeral partition not found: {}",
                partition.display()
            )));
        }

        let mounts_dumped = &AtomicBool::new(false);
        let partition = partition.as_path();

        RetryPolicy::constant(Duration::from_secs(timeouts::DISK_VERIFY_SECS))
            .with_units(Duration::from_millis(timeouts::DISK_VERIFY_INTERVAL_MS))
            .retry_with_context(ctx, move || async move {
                match rt.disks().try_lock_exclusive(partition) {
                    Ok(()) => Ok(()),
                    Err(Errno::EBUSY) => {
                        if !mounts_dumped.swap(true, Ordering::Relaxed) {
                            let mounts = rt.mounts().dump().unwrap_or_else(|e| e.to_string());
                            tracing::warn!(
                                partition = %partition.display(),
                                mounts = %mounts,
                                "Ephemeral partition is busy"
                            );
                        }
                        Err(MachinedError::expected(MachinedError::Storage(format!(
                            "ephemeral partition in use: {}",
                            partition.display()
                        ))))
                    }
                    Err(e) => Err(MachinedError::Storage(format!(
                        "failed to verify ephemeral partition not in use: {}",
                        e
                    ))),
                }
            })
            .await
    }
}

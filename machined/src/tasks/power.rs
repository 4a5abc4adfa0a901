//! Tasks: kexec staging and the terminal power transitions.
//!
//! `Reboot` and `Shutdown` end a sequence by returning
//! [`MachinedError::Reboot`]; the executor turns that into the sequence's
//! restart command.

use crate::bootloader::GrubConfig;
use crate::context::ExecutionContext;
use crate::events::{Event, EventKind};
use crate::pipeline::Task;
use crate::runtime::constants::kernel_params;
use crate::sequencer::RebootMode;
use crate::util::KernelCmdline;
use async_trait::async_trait;
use machined_shared::{MachinedError, MachinedResult, RebootCmd};
use nix::errno::Errno;
use std::fs::File;
use std::path::Path;

/// Load the default boot entry's kernel so the next reboot can skip the
/// firmware.
///
/// Missing bootloader config, a power-cycle request and kernels without
/// kexec support all just leave the flag unset.
pub struct KexecPrepare;

fn open_boot_file(boot: &Path, relative: &str) -> MachinedResult<File> {
    let path = boot.join(relative.trim_start_matches('/'));
    File::open(&path).map_err(|e| {
        MachinedError::Internal(format!("failed to open {}: {}", path.display(), e))
    })
}

#[async_trait]
impl Task for KexecPrepare {
    fn name(&self) -> &str {
        "kexec_prepare"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();

        if ctx.data().reboot_mode() == RebootMode::PowerCycle {
            tracing::info!("Skipping kexec: power cycle requested");
            return Ok(());
        }

        if rt.config().is_none() {
            return Ok(());
        }

        let Some(grub) = GrubConfig::read(&rt.options().grub_config)? else {
            return Ok(());
        };

        let Some(entry) = grub.default_entry() else {
            tracing::warn!(default = %grub.default, "Skipping kexec: default boot entry not found");
            return Ok(());
        };

        let boot = &rt.options().boot_mount_point;
        let kernel = open_boot_file(boot, &entry.linux)?;
        let initrd = open_boot_file(boot, &entry.initrd)?;
        let cmdline = entry.cmdline.trim();

        match rt.kexec().load(&kernel, &initrd, cmdline) {
            Ok(()) => {}
            Err(Errno::ENOSYS) => {
                tracing::warn!("Kexec support is disabled in the kernel");
                return Ok(());
            }
            Err(Errno::EPERM) => {
                tracing::warn!("Kexec support is disabled via sysctl");
                return Ok(());
            }
            Err(Errno::EBUSY) => {
                tracing::warn!("Kexec is busy");
                return Ok(());
            }
            Err(e) => {
                return Err(MachinedError::Internal(format!(
                    "error loading kernel for kexec: {}",
                    e
                )));
            }
        }

        tracing::info!(entry = %entry.title, cmdline, "Prepared kexec environment");
        rt.machine().set_kexec_prepared(true);
        Ok(())
    }
}

/// Request a restart, through kexec when a kernel was staged.
pub struct Reboot;

#[async_trait]
impl Task for Reboot {
    fn name(&self) -> &str {
        "reboot"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let cmd = if rt.machine().is_kexec_prepared() {
            RebootCmd::Kexec
        } else {
            RebootCmd::Restart
        };

        rt.events().publish(Event::restart(cmd));
        rt.fire(EventKind::Rebooted, "rebooted");

        Err(MachinedError::Reboot(cmd))
    }
}

/// Request power-off, or halt when the kernel command line asks for it.
pub struct Shutdown;

impl Shutdown {
    fn command(cmdline_path: &Path) -> RebootCmd {
        let cmdline = match KernelCmdline::read(cmdline_path) {
            Ok(cmdline) => cmdline,
            Err(e) => {
                tracing::debug!(error = %e, "Kernel command line unavailable");
                return RebootCmd::PowerOff;
            }
        };

        match cmdline.get(kernel_params::SHUTDOWN) {
            Some("halt") => RebootCmd::Halt,
            _ => RebootCmd::PowerOff,
        }
    }
}

#[async_trait]
impl Task for Shutdown {
    fn name(&self) -> &str {
        "shutdown"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let cmd = Self::command(&rt.options().kernel_cmdline);

        rt.events().publish(Event::restart(cmd));

        Err(MachinedError::Reboot(cmd))
    }
}

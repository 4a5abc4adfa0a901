//! Process reaping for the force-cleanup phase.

use crate::runtime::collaborators::ProcessReaper;
use machined_shared::{MachinedError, MachinedResult};
use nix::errno::Errno;
use std::path::{Path, PathBuf};

/// Kills every user-space process except init and the caller.
#[derive(Debug, Clone)]
pub struct ProcfsReaper {
    proc_root: PathBuf,
}

impl Default for ProcfsReaper {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl ProcfsReaper {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl ProcessReaper for ProcfsReaper {
    fn kill_all(&self) -> MachinedResult<()> {
        let pids = candidates(&self.proc_root, std::process::id())?;
        let mut failed = Vec::new();

        for pid in pids {
            if let Err(errno) = sigkill(pid) {
                failed.push(format!("{} ({})", pid, errno));
            }
        }

        tracing::debug!(failed = failed.len(), "Sent SIGKILL to remaining processes");

        if failed.is_empty() {
            Ok(())
        } else {
            Err(MachinedError::Internal(format!(
                "failed to kill pids: {}",
                failed.join(", ")
            )))
        }
    }
}

/// SIGKILL `pid`. A process that exited in the meantime counts as killed.
fn sigkill(pid: u32) -> Result<(), Errno> {
    let pid = libc::pid_t::try_from(pid).map_err(|_| Errno::EINVAL)?;
    let ret = unsafe { libc::kill(pid, libc::SIGKILL) };
    match Errno::result(ret) {
        Ok(_) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(errno),
    }
}

/// PIDs under `proc_root` that are user-space processes other than init and
/// `self_pid`. Kernel threads have an empty cmdline and are skipped.
fn candidates(proc_root: &Path, self_pid: u32) -> MachinedResult<Vec<u32>> {
    let mut pids = Vec::new();

    for entry in std::fs::read_dir(proc_root)? {
        let entry = entry?;
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };

        if pid == 1 || pid == self_pid {
            continue;
        }

        // Process may have exited since the directory listing.
        let Ok(cmdline) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        if cmdline.is_empty() {
            continue;
        }

        pids.push(pid);
    }

    pids.sort_unstable();
    Ok(pids)
}

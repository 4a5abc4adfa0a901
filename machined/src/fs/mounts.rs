//! `/proc/mounts` parsing and unmount helpers.

use machined_shared::{MachinedError, MachinedResult};
use nix::errno::Errno;
use nix::mount::{MntFlags, umount2};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::runtime::constants::paths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
}

/// Which mount table to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountSource {
    /// `/proc/mounts`
    System,
    /// `/proc/self/mounts`, the caller's mount namespace.
    Process,
}

pub trait MountTable: Send + Sync {
    fn read(&self, source: MountSource) -> MachinedResult<Vec<MountEntry>>;

    fn unmount(&self, target: &Path) -> Result<(), Errno>;

    /// Lazy unmount, used when cleaning up after everything else.
    fn detach(&self, target: &Path) -> Result<(), Errno>;

    /// Raw table contents, for diagnostics.
    fn dump(&self) -> MachinedResult<String>;
}

/// Mount table of the running host.
#[derive(Debug, Clone)]
pub struct HostMountTable {
    system: PathBuf,
    process: PathBuf,
}

impl Default for HostMountTable {
    fn default() -> Self {
        Self {
            system: PathBuf::from(paths::PROC_MOUNTS),
            process: PathBuf::from(paths::PROC_SELF_MOUNTS),
        }
    }
}

impl HostMountTable {
    fn path(&self, source: MountSource) -> &Path {
        match source {
            MountSource::System => &self.system,
            MountSource::Process => &self.process,
        }
    }
}

impl MountTable for HostMountTable {
    fn read(&self, source: MountSource) -> MachinedResult<Vec<MountEntry>> {
        let raw = std::fs::read_to_string(self.path(source))?;
        Ok(parse_mounts(&raw))
    }

    fn unmount(&self, target: &Path) -> Result<(), Errno> {
        umount2(target, MntFlags::empty())
    }

    fn detach(&self, target: &Path) -> Result<(), Errno> {
        umount2(target, MntFlags::MNT_DETACH)
    }

    fn dump(&self) -> MachinedResult<String> {
        Ok(std::fs::read_to_string(self.path(MountSource::System))?)
    }
}

/// Parse `/proc/mounts` formatted text. Lines with fewer than two fields
/// are skipped.
pub fn parse_mounts(raw: &str) -> Vec<MountEntry> {
    raw.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next().unwrap_or_default();
            Some(MountEntry {
                source: unescape(source),
                target: PathBuf::from(unescape(target)),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Decode the octal escapes (`\040` etc.) the kernel uses for whitespace.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push((value & 0xff) as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Unmount every entry of `source` matching `predicate`, in table order.
///
/// `EINVAL` means the target is no longer a mount point and is skipped.
/// Any other failure stops the walk.
pub fn unmount_matching<F>(
    table: &dyn MountTable,
    source: MountSource,
    mut predicate: F,
) -> MachinedResult<usize>
where
    F: FnMut(&MountEntry) -> bool,
{
    let mut unmounted = 0;

    for entry in table.read(source)? {
        if !predicate(&entry) {
            continue;
        }

        info!(target = %entry.target.display(), "Unmounting");

        match table.unmount(&entry.target) {
            Ok(()) => unmounted += 1,
            Err(Errno::EINVAL) => {
                warn!(
                    target = %entry.target.display(),
                    error = %Errno::EINVAL,
                    "Ignoring unmount error"
                );
            }
            Err(e) => {
                return Err(MachinedError::Mount(format!(
                    "error unmounting {}: {}",
                    entry.target.display(),
                    e
                )));
            }
        }
    }

    Ok(unmounted)
}

/// Detach every block-device backed mount except the root, innermost first.
pub fn force_unmount_all(table: &dyn MountTable) -> MachinedResult<()> {
    let entries = table.read(MountSource::System)?;
    let mut failed = Vec::new();

    for entry in entries.iter().rev() {
        if !entry.source.starts_with("/dev/") || entry.target == Path::new("/") {
            continue;
        }
        match table.detach(&entry.target) {
            Ok(()) | Err(Errno::EINVAL) | Err(Errno::ENOENT) => {
                debug!(target = %entry.target.display(), "Detached");
            }
            Err(e) => failed.push(format!("{}: {}", entry.target.display(), e)),
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(MachinedError::Mount(format!(
            "failed to unmount: {}",
            failed.join(", ")
        )))
    }
}

//! Block device naming and exclusive-open probe.

use machined_shared::{MachinedError, MachinedResult};
use nix::errno::Errno;
use nix::fcntl::{OFlag, open};
use nix::sys::stat::Mode;
use std::path::{Path, PathBuf};

/// Path of partition `index` on `device`.
///
/// Devices whose name ends in a digit (`nvme0n1`, `mmcblk0`, `loop0`) get a
/// `p` separator, as the kernel names them.
pub fn partition_path(device: &str, index: u32) -> MachinedResult<PathBuf> {
    if device.is_empty() || !device.starts_with("/dev/") {
        return Err(MachinedError::Storage(format!(
            "not a device path: {:?}",
            device
        )));
    }
    let separator = if device.ends_with(|c: char| c.is_ascii_digit()) {
        "p"
    } else {
        ""
    };
    Ok(PathBuf::from(format!("{}{}{}", device, separator, index)))
}

/// Open `path` read-only with `O_EXCL`. Block devices fail with `EBUSY` while
/// mounted or held by another exclusive opener.
pub fn probe_exclusive(path: &Path) -> Result<(), Errno> {
    let fd = open(
        path,
        OFlag::O_RDONLY | OFlag::O_EXCL | OFlag::O_CLOEXEC,
        Mode::empty(),
    )?;
    drop(fd);
    Ok(())
}

//! Host filesystem helpers: the mount table and block device probes.

mod device;
mod mounts;

pub use device::{partition_path, probe_exclusive};
pub use mounts::{
    HostMountTable, MountEntry, MountSource, MountTable, force_unmount_all, parse_mounts,
    unmount_matching,
};

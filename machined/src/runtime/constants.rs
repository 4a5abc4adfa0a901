//! Well-known names, labels and defaults.

/// Installer image used when the machine config does not name one.
pub const DEFAULT_INSTALLER_IMAGE: &str = "ghcr.io/machined/installer:latest";

/// Service identifiers understood by the service supervisor.
pub mod services {
    pub const CRI: &str = "cri";
    pub const UDEVD: &str = "udevd";
    pub const TRUSTD: &str = "trustd";
    pub const ETCD: &str = "etcd";
    pub const KUBELET: &str = "kubelet";
}

/// System disk partition labels.
pub mod partitions {
    pub const BOOT: &str = "BOOT";
    pub const STATE: &str = "STATE";
    pub const EPHEMERAL: &str = "EPHEMERAL";

    /// Partition number of the ephemeral partition on the system disk.
    pub const EPHEMERAL_INDEX: u32 = 2;
}

/// Kernel command line parameters.
pub mod kernel_params {
    /// `machined.shutdown=halt` turns power-off into halt.
    pub const SHUTDOWN: &str = "machined.shutdown";
}

/// Default filesystem locations.
pub mod paths {
    pub const CONFIG: &str = "/system/state/config.json";
    pub const KUBELET_CLIENT_CERT: &str = "/var/lib/kubelet/pki/kubelet-client-current.pem";
    pub const ETCD_DATA: &str = "/var/lib/etcd";
    pub const EPHEMERAL_MOUNT_POINT: &str = "/var";
    pub const BOOT_MOUNT_POINT: &str = "/boot";
    pub const GRUB_CONFIG: &str = "/boot/grub/grub.cfg";
    pub const KERNEL_CMDLINE: &str = "/proc/cmdline";
    pub const PROC_MOUNTS: &str = "/proc/mounts";
    pub const PROC_SELF_MOUNTS: &str = "/proc/self/mounts";
    pub const META_DB: &str = "/system/meta/meta.db";
    pub const LOG_DIR: &str = "/var/log/machined";
}

/// Default timings, in seconds.
pub mod timeouts {
    pub const PAUSE_ON_FAILURE_SECS: u64 = 5 * 60;
    pub const PROGRESS_INTERVAL_SECS: u64 = 15;
    pub const BOOT_SECS: u64 = 70 * 60;
    pub const LIFECYCLE_FINALIZERS_SECS: u64 = 30;
    pub const KUBELET_SHUTDOWN_GRACE_SECS: u64 = 30;
    pub const POD_TEARDOWN_SECS: u64 = 3 * 60;
    pub const CONFIG_FETCH_SECS: u64 = 70;
    pub const NODE_READY_SECS: u64 = 10 * 60;
    /// Budget for building a kubelet client before uncordon.
    pub const KUBELET_CLIENT_SECS: u64 = 5 * 60;
    pub const MEMBERSHIP_CONNECT_SECS: u64 = 60;
    /// Budget for the ephemeral partition to become exclusively lockable.
    pub const DISK_VERIFY_SECS: u64 = 3 * 60;
    pub const DISK_VERIFY_INTERVAL_MS: u64 = 500;
}

//! `kexec_file_load(2)` loader.

use crate::runtime::collaborators::KexecLoader;
use nix::errno::Errno;
use std::ffi::CString;
use std::fs::File;

#[derive(Debug, Clone, Copy, Default)]
pub struct HostKexecLoader;

impl KexecLoader for HostKexecLoader {
    #[cfg(target_os = "linux")]
    fn load(&self, kernel: &File, initrd: &File, cmdline: &str) -> Result<(), Errno> {
        use std::os::fd::AsRawFd;

        let cmdline = CString::new(cmdline).map_err(|_| Errno::EINVAL)?;
        let bytes = cmdline.as_bytes_with_nul();

        let ret = unsafe {
            libc::syscall(
                libc::SYS_kexec_file_load,
                kernel.as_raw_fd(),
                initrd.as_raw_fd(),
                bytes.len() as libc::c_ulong,
                bytes.as_ptr(),
                0 as libc::c_ulong,
            )
        };

        Errno::result(ret).map(drop)
    }

    #[cfg(not(target_os = "linux"))]
    fn load(&self, _kernel: &File, _initrd: &File, cmdline: &str) -> Result<(), Errno> {
        let _ = CString::new(cmdline).map_err(|_| Errno::EINVAL)?;
        Err(Errno::ENOSYS)
    }
}

pub mod cmdline;
pub mod kexec;
pub mod process;

pub use cmdline::KernelCmdline;
pub use kexec::HostKexecLoader;
pub use process::ProcfsReaper;

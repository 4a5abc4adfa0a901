//! Power-state commands carried by terminal sequence outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Command handed to `reboot(2)` once a sequence finishes.
///
/// Values match the kernel's `LINUX_REBOOT_CMD_*` constants so the caller
/// can pass [`RebootCmd::code`] straight through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebootCmd {
    /// Normal firmware-mediated restart.
    Restart,
    /// Power the machine off.
    PowerOff,
    /// Halt without powering off.
    Halt,
    /// Jump into the kernel previously loaded with kexec.
    Kexec,
}

impl RebootCmd {
    pub const fn code(self) -> i64 {
        match self {
            RebootCmd::Restart => 0x0123_4567,
            RebootCmd::PowerOff => 0x4321_FEDC,
            RebootCmd::Halt => 0xCDEF_0123,
            RebootCmd::Kexec => 0x4558_4543,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        [Self::Restart, Self::PowerOff, Self::Halt, Self::Kexec]
            .into_iter()
            .find(|cmd| cmd.code() == code)
    }
}

impl fmt::Display for RebootCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RebootCmd::Restart => "restart",
            RebootCmd::PowerOff => "power-off",
            RebootCmd::Halt => "halt",
            RebootCmd::Kexec => "kexec",
        };
        f.write_str(name)
    }
}

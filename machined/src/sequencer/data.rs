//! Sequence identifiers and their payloads.

use crate::runtime::collaborators::ResetTarget;
use machined_shared::{MachinedError, MachinedResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Machine lifecycle scenarios. Each maps to a fixed phase table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sequence {
    /// First steps of every boot: state partition and config.
    Initialize,
    Boot,
    /// Fresh install, or apply a staged upgrade.
    Install,
    Upgrade,
    /// Persist an upgrade and reboot into it.
    StageUpgrade,
    /// Upgrade from maintenance mode, without a running cluster.
    MaintenanceUpgrade,
    Shutdown,
    Reboot,
    Reset,
}

impl Sequence {
    pub const ALL: [Sequence; 9] = [
        Sequence::Initialize,
        Sequence::Boot,
        Sequence::Install,
        Sequence::Upgrade,
        Sequence::StageUpgrade,
        Sequence::MaintenanceUpgrade,
        Sequence::Shutdown,
        Sequence::Reboot,
        Sequence::Reset,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Sequence::Initialize => "initialize",
            Sequence::Boot => "boot",
            Sequence::Install => "install",
            Sequence::Upgrade => "upgrade",
            Sequence::StageUpgrade => "stage-upgrade",
            Sequence::MaintenanceUpgrade => "maintenance-upgrade",
            Sequence::Shutdown => "shutdown",
            Sequence::Reboot => "reboot",
            Sequence::Reset => "reset",
        }
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sequence {
    type Err = MachinedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sequence::ALL
            .into_iter()
            .find(|seq| seq.as_str() == s)
            .ok_or_else(|| MachinedError::Unsupported(format!("unknown sequence: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebootMode {
    #[default]
    Default,
    /// Go through firmware; never kexec.
    PowerCycle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeRequest {
    pub image: String,
    /// Keep ephemeral data and cluster membership.
    pub preserve: bool,
    /// Stage the upgrade and apply it on next boot.
    pub stage: bool,
    pub force: bool,
    pub reboot_mode: RebootMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebootRequest {
    pub mode: RebootMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetRequest {
    /// Drain, leave the cluster and remove pods before wiping.
    pub graceful: bool,
    /// Reboot afterwards instead of powering off.
    pub reboot: bool,
    /// Wipe only these partitions; empty wipes the whole disk.
    pub system_disk_targets: Vec<ResetTarget>,
}

/// Sequence-specific payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "request", rename_all = "snake_case")]
pub enum SequenceData {
    #[default]
    None,
    Upgrade(UpgradeRequest),
    Reboot(RebootRequest),
    Reset(ResetRequest),
}

impl SequenceData {
    pub fn upgrade(&self) -> MachinedResult<&UpgradeRequest> {
        match self {
            SequenceData::Upgrade(req) => Ok(req),
            other => Err(invalid("upgrade request", other)),
        }
    }

    pub fn reset(&self) -> MachinedResult<&ResetRequest> {
        match self {
            SequenceData::Reset(req) => Ok(req),
            other => Err(invalid("reset request", other)),
        }
    }

    /// Reboot mode carried by either an upgrade or a reboot request.
    pub fn reboot_mode(&self) -> RebootMode {
        match self {
            SequenceData::Upgrade(req) => req.reboot_mode,
            SequenceData::Reboot(req) => req.mode,
            _ => RebootMode::Default,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SequenceData::None => "none",
            SequenceData::Upgrade(_) => "upgrade",
            SequenceData::Reboot(_) => "reboot",
            SequenceData::Reset(_) => "reset",
        }
    }
}

fn invalid(expected: &str, got: &SequenceData) -> MachinedError {
    MachinedError::InvalidSequenceData(format!("expected {}, got {}", expected, got.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_names_roundtrip() {
        for seq in Sequence::ALL {
            assert_eq!(seq.as_str().parse::<Sequence>().unwrap(), seq);
        }
        assert!("hibernate".parse::<Sequence>().is_err());
    }

    #[test]
    fn test_payload_accessors() {
        let data = SequenceData::Reset(ResetRequest {
            graceful: true,
            ..Default::default()
        });
        assert!(data.reset().unwrap().graceful);
        assert!(matches!(
            data.upgrade(),
            Err(MachinedError::InvalidSequenceData(_))
        ));
    }

    #[test]
    fn test_reboot_mode() {
        let data = SequenceData::Reboot(RebootRequest {
            mode: RebootMode::PowerCycle,
        });
        assert_eq!(data.reboot_mode(), RebootMode::PowerCycle);
        assert_eq!(SequenceData::None.reboot_mode(), RebootMode::Default);
    }

    #[test]
    fn test_request_json() {
        let data: SequenceData = serde_json::from_str(
            r#"{"kind":"upgrade","request":{"image":"installer:v2","preserve":true}}"#,
        )
        .unwrap();
        let req = data.upgrade().unwrap();
        assert_eq!(req.image, "installer:v2");
        assert!(req.preserve);
        assert!(!req.stage);
    }
}

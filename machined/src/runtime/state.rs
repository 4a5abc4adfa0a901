//! Machine state shared by concurrently running tasks.

use crate::bootloader::meta::{MetaStore, MetaTag};
use machined_shared::MachinedResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformMode {
    Metal,
    Cloud,
    Container,
}

impl PlatformMode {
    /// Containers share the host kernel and disks.
    pub fn is_container(self) -> bool {
        self == PlatformMode::Container
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub name: String,
    pub mode: PlatformMode,
}

impl Platform {
    pub fn new(name: impl Into<String>, mode: PlatformMode) -> Self {
        Self {
            name: name.into(),
            mode,
        }
    }
}

/// Installer image and serialized options persisted before a reboot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInstall {
    pub image_ref: String,
    pub options: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MachineState {
    installed: AtomicBool,
    kexec_prepared: AtomicBool,
    system_disk: RwLock<Option<String>>,
    staged: RwLock<Option<StagedInstall>>,
}

impl MachineState {
    pub fn new(installed: bool, system_disk: Option<String>) -> Self {
        Self {
            installed: AtomicBool::new(installed),
            kexec_prepared: AtomicBool::new(false),
            system_disk: RwLock::new(system_disk),
            staged: RwLock::new(None),
        }
    }

    pub fn installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    pub fn set_installed(&self, installed: bool) {
        self.installed.store(installed, Ordering::SeqCst);
    }

    /// Device name of the disk the OS booted from, e.g. `/dev/sda`.
    pub fn system_disk(&self) -> Option<String> {
        self.system_disk.read().clone()
    }

    pub fn set_system_disk(&self, device: impl Into<String>) {
        *self.system_disk.write() = Some(device.into());
    }

    pub fn is_kexec_prepared(&self) -> bool {
        self.kexec_prepared.load(Ordering::SeqCst)
    }

    pub fn set_kexec_prepared(&self, prepared: bool) {
        self.kexec_prepared.store(prepared, Ordering::SeqCst);
    }

    pub fn is_install_staged(&self) -> bool {
        self.staged.read().is_some()
    }

    pub fn staged_install(&self) -> Option<StagedInstall> {
        self.staged.read().clone()
    }

    pub fn set_staged_install(&self, staged: Option<StagedInstall>) {
        *self.staged.write() = staged;
    }

    /// Pick up a staged install left in the metadata store by the previous
    /// boot. The tags are consumed so a failing upgrade is tried only once.
    pub fn load_staged_install(&self, meta: &dyn MetaStore) -> MachinedResult<()> {
        let image_ref = meta.read_tag(MetaTag::StagedInstallImageRef)?;
        let options = meta.read_tag(MetaTag::StagedInstallOptions)?;

        if let (Some(image_ref), Some(options)) = (image_ref, options) {
            let image_ref = String::from_utf8_lossy(&image_ref).into_owned();
            tracing::info!(image = %image_ref, "Found staged install");
            self.set_staged_install(Some(StagedInstall { image_ref, options }));
        }

        meta.delete_tag(MetaTag::StagedInstallImageRef)?;
        meta.delete_tag(MetaTag::StagedInstallOptions)?;
        Ok(())
    }
}

//! Tasks: install, upgrade and bootloader bookkeeping.

use crate::bootloader::MetaTag;
use crate::context::ExecutionContext;
use crate::events::EventKind;
use crate::install::{InstallAction, InstallOptions, stage_install};
use crate::pipeline::Task;
use crate::runtime::InstallerRun;
use crate::runtime::state::StagedInstall;
use async_trait::async_trait;
use machined_shared::MachinedResult;

/// Install to the configured disk, or apply an upgrade staged on the
/// previous boot.
pub struct Install;

impl Install {
    async fn run_installer(
        ctx: &ExecutionContext,
        run: &InstallerRun,
        success: EventKind,
    ) -> MachinedResult<()> {
        let rt = ctx.runtime();

        if let Err(e) = ctx.bound(rt.installer().run(run)).await {
            tracing::error!(image = %run.image, disk = %run.disk, error = %e, "Installer failed");
            rt.fire(EventKind::Failure, format!("failed to install: {}", e));
            return Err(e);
        }

        rt.fire(success, format!("installed {} to {}", run.image, run.disk));
        Ok(())
    }
}

#[async_trait]
impl Task for Install {
    fn name(&self) -> &str {
        "install"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();

        match InstallAction::decide(rt.machine())? {
            InstallAction::Fresh => {
                let config = rt.require_config()?;
                let run = InstallerRun {
                    disk: config.install_disk()?.to_string(),
                    platform: rt.platform().name.clone(),
                    image: config.install_image().to_string(),
                    options: InstallOptions::fresh_install(&config),
                };

                tracing::info!(image = %run.image, disk = %run.disk, "Installing");
                Self::run_installer(ctx, &run, EventKind::Installed).await?;

                rt.machine().set_system_disk(run.disk);
                rt.machine().set_installed(true);
                tracing::info!("Install successful");
            }
            InstallAction::ApplyStaged(StagedInstall { image_ref, options }) => {
                let run = InstallerRun {
                    disk: rt.system_disk()?,
                    platform: rt.platform().name.clone(),
                    image: image_ref,
                    options: InstallOptions::from_bytes(&options)?,
                };

                tracing::info!(image = %run.image, disk = %run.disk, "Performing staged upgrade");
                Self::run_installer(ctx, &run, EventKind::Upgraded).await?;

                rt.machine().set_staged_install(None);
                tracing::info!("Staged upgrade successful");
            }
        }

        Ok(())
    }
}

/// Run the installer in upgrade mode against the system disk.
pub struct Upgrade;

#[async_trait]
impl Task for Upgrade {
    fn name(&self) -> &str {
        "upgrade"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let request = ctx.data().upgrade()?;
        let config = rt.config();

        let run = InstallerRun {
            disk: rt.system_disk()?,
            platform: rt.platform().name.clone(),
            image: request.image.clone(),
            options: InstallOptions::from_upgrade_request(request, config.as_deref()),
        };

        tracing::info!(image = %run.image, disk = %run.disk, "Performing upgrade");
        ctx.bound(rt.installer().run(&run)).await?;

        tracing::info!("Upgrade successful");
        Ok(())
    }
}

/// Record the upgrade in the metadata store; the Install sequence applies
/// it on the next boot.
pub struct StageUpgrade;

#[async_trait]
impl Task for StageUpgrade {
    fn name(&self) -> &str {
        "stage_upgrade"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let request = ctx.data().upgrade()?;
        let config = rt.config();
        let options = InstallOptions::from_upgrade_request(request, config.as_deref());

        stage_install(rt.meta(), &request.image, &options)?;
        rt.machine().set_staged_install(Some(StagedInstall {
            image_ref: request.image.clone(),
            options: options.to_bytes()?,
        }));
        Ok(())
    }
}

/// The new version booted: drop the bootloader fallback.
pub struct UpdateBootloader;

#[async_trait]
impl Task for UpdateBootloader {
    fn name(&self) -> &str {
        "update_bootloader"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        if ctx.runtime().meta().delete_tag(MetaTag::Upgrade)? {
            tracing::info!("Removing fallback");
        }
        Ok(())
    }
}

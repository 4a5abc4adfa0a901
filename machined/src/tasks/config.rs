//! Tasks: load, validate and persist the machine config.

use crate::context::ExecutionContext;
use crate::events::EventKind;
use crate::pipeline::Task;
use crate::runtime::config::MachineConfig;
use async_trait::async_trait;
use machined_shared::{MachinedError, MachinedResult};
use std::io::Write;
use std::path::Path;

/// Load the machine config: reuse the persisted copy when allowed,
/// otherwise fetch it from the platform, falling back to maintenance mode.
pub struct LoadConfig;

#[async_trait]
impl Task for LoadConfig {
    fn name(&self) -> &str {
        "load_config"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let path = &rt.options().config_path;

        match read_persisted(path) {
            Ok(Some(config)) if config.persist => {
                tracing::info!(path = %path.display(), "Persistence is enabled, using existing config on disk");
                rt.fire(EventKind::ConfigLoaded, "machine config loaded successfully");
                rt.set_config(config);
                return Ok(());
            }
            Ok(Some(_)) => {
                tracing::info!("Found existing config, but persistence is disabled, downloading config");
            }
            Ok(None) => tracing::info!("Downloading config"),
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable config on disk, downloading config"),
        }

        download(ctx).await
    }
}

fn read_persisted(path: &Path) -> MachinedResult<Option<MachineConfig>> {
    match std::fs::read(path) {
        Ok(raw) => MachineConfig::from_bytes(&raw).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn download(ctx: &ExecutionContext) -> MachinedResult<()> {
    let rt = ctx.runtime();
    let fetch_ctx = ctx.with_timeout(rt.options().config_fetch_timeout);

    let raw = match fetch_ctx.bound(rt.config_source().fetch()).await {
        Err(MachinedError::NoConfigSource) => {
            tracing::info!("Machine configuration not found; starting maintenance service");
            // Maintenance mode counts as activation: the operator can
            // interact with the machine from here on.
            rt.fire(
                EventKind::Activate,
                "booted into maintenance mode, ready for user interaction",
            );
            ctx.bound(rt.config_source().receive_via_maintenance())
                .await
                .map_err(|e| {
                    MachinedError::Config(format!(
                        "failed to receive config via maintenance service: {}",
                        e
                    ))
                })?
        }
        Err(e) => {
            report_load_error(ctx, &e, "error fetching machine config");
            return Err(e);
        }
        Ok(raw) => raw,
    };

    tracing::info!("Storing config in memory");

    let config = match rt.load_and_validate_config(&raw) {
        Ok(config) => config,
        Err(e) => {
            report_load_error(ctx, &e, "error loading and validating machine config");
            return Err(e);
        }
    };

    rt.fire(EventKind::ConfigLoaded, "machine config loaded successfully");
    rt.set_config(config);
    Ok(())
}

fn report_load_error(ctx: &ExecutionContext, err: &MachinedError, message: &str) {
    let rt = ctx.runtime();
    rt.fire(
        EventKind::ConfigLoadError {
            error: err.to_string(),
        },
        message,
    );
    rt.fire(EventKind::Failure, message);
}

pub struct ValidateConfig;

#[async_trait]
impl Task for ValidateConfig {
    fn name(&self) -> &str {
        "validate_config"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        ctx.runtime().require_config()?.validate()
    }
}

/// Write the loaded config to the state partition, owner-readable only.
pub struct SaveConfig;

#[async_trait]
impl Task for SaveConfig {
    fn name(&self) -> &str {
        "save_config"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let raw = rt.require_config()?.to_bytes()?;
        let path = &rt.options().config_path;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = open_private(path)?;
        file.write_all(&raw)?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), bytes = raw.len(), "Saved machine config");
        Ok(())
    }
}

fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

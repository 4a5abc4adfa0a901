//! Tasks: start and stop system services.

use crate::conditions::{AllConditions, BoxedCondition, wait_for_service, wait_with_progress};
use crate::context::ExecutionContext;
use crate::events::EventKind;
use crate::pipeline::Task;
use crate::runtime::constants::services;
use crate::runtime::{MachineType, StateEvent, SystemService};
use async_trait::async_trait;
use machined_shared::{MachinedError, MachinedResult};

/// Start the local shutdown-inhibitor bus.
pub struct StartDBus;

#[async_trait]
impl Task for StartDBus {
    fn name(&self) -> &str {
        "start_dbus"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        ctx.runtime().inhibitor().start()
    }
}

/// Stop the inhibitor bus. Failures are logged only.
pub struct StopDBus;

#[async_trait]
impl Task for StopDBus {
    fn name(&self) -> &str {
        "stop_dbus"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        if let Err(e) = ctx.runtime().inhibitor().stop() {
            tracing::warn!(error = %e, "Error stopping dbus");
        }
        Ok(())
    }
}

/// Start the services for this machine's role and wait until all of them
/// are up.
///
/// The kubelet is only loaded here; it is started later by its own
/// controller, so it is not part of the wait.
pub struct StartAllServices;

impl StartAllServices {
    fn services_for(machine_type: MachineType) -> MachinedResult<Vec<SystemService>> {
        let mut list = vec![SystemService::Cri];
        match machine_type {
            MachineType::Init => {
                list.push(SystemService::Trustd);
                list.push(SystemService::Etcd { bootstrap: true });
            }
            MachineType::ControlPlane => {
                list.push(SystemService::Trustd);
                list.push(SystemService::Etcd { bootstrap: false });
            }
            MachineType::Worker => {}
            MachineType::Unknown => {
                return Err(MachinedError::Config("unexpected machine type".into()));
            }
        }
        Ok(list)
    }
}

#[async_trait]
impl Task for StartAllServices {
    fn name(&self) -> &str {
        "start_all_services"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let config = rt.require_config()?;
        let supervisor = rt.services();

        rt.fire(EventKind::Activate, "ready for user interaction");

        let list = Self::services_for(config.machine.machine_type)?;

        supervisor.load(SystemService::Kubelet).await?;
        for service in &list {
            supervisor.load_and_start(*service).await?;
        }

        let poll = rt.options().service_poll_interval;
        let conditions: Vec<BoxedCondition> = supervisor
            .list()
            .into_iter()
            // Loaded but not started here; its own controller starts it
            // after boot, so waiting on it would never finish.
            .filter(|snapshot| snapshot.id != services::KUBELET)
            .map(|snapshot| {
                Box::new(wait_for_service(
                    supervisor.clone(),
                    StateEvent::Up,
                    snapshot.id,
                    poll,
                )) as BoxedCondition
            })
            .collect();

        let all = AllConditions::new(conditions);
        tracing::info!(count = all.len(), "Waiting for services to start");

        let wait_ctx = ctx.with_timeout(rt.options().boot_timeout);
        wait_with_progress(&all, &wait_ctx, rt.options().progress_interval).await?;

        tracing::info!("All system services started");
        Ok(())
    }
}

/// Stop every loaded service. Failures are logged only.
pub struct StopAllServices;

#[async_trait]
impl Task for StopAllServices {
    fn name(&self) -> &str {
        "stop_all_services"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        if let Err(e) = ctx.bound(ctx.runtime().services().shutdown()).await {
            tracing::warn!(error = %e, "Error shutting down services");
        }
        Ok(())
    }
}

/// Stop the services that keep the ephemeral partition busy.
pub struct StopServicesEphemeral;

#[async_trait]
impl Task for StopServicesEphemeral {
    fn name(&self) -> &str {
        "stop_services_ephemeral"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        ctx.bound(
            ctx.runtime()
                .services()
                .stop_with_reverse_dependencies(&[services::CRI, services::UDEVD, services::TRUSTD]),
        )
        .await
    }
}

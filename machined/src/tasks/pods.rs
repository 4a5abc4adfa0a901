//! Tasks: stop or remove every pod before the node goes down.
//!
//! Teardown order:
//! 1. let the kubelet lifecycle finalizers clear (bounded, non-fatal)
//! 2. wait for the kubelet's graceful shutdown inhibit lock (bounded, non-fatal)
//! 3. stop the kubelet
//! 4. stop pod-network sandboxes, then everything else

use crate::context::ExecutionContext;
use crate::pipeline::Task;
use crate::runtime::constants::services;
use crate::runtime::{NamespaceMode, StopAction};
use async_trait::async_trait;
use machined_shared::MachinedResult;

/// Stop pods, keeping their sandboxes for the next boot.
pub struct StopAllPods;

#[async_trait]
impl Task for StopAllPods {
    fn name(&self) -> &str {
        "stop_all_pods"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        stop_and_remove_all_pods(ctx, StopAction::StopOnly).await
    }
}

/// Stop and remove every pod sandbox.
pub struct RemoveAllPods;

#[async_trait]
impl Task for RemoveAllPods {
    fn name(&self) -> &str {
        "remove_all_pods"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        stop_and_remove_all_pods(ctx, StopAction::StopAndRemove).await
    }
}

async fn stop_and_remove_all_pods(ctx: &ExecutionContext, action: StopAction) -> MachinedResult<()> {
    let rt = ctx.runtime();
    let options = rt.options();

    if let Err(e) = wait_for_lifecycle_finalizers(ctx).await {
        tracing::warn!(error = %e, "Failed waiting for kubelet lifecycle finalizers");
    }

    tracing::info!("Shutting down kubelet gracefully");

    let shutdown_ctx = ctx.with_timeout(options.kubelet_shutdown_grace * 2);
    if let Err(e) = shutdown_ctx.bound(rt.inhibitor().wait_shutdown()).await {
        tracing::warn!(error = %e, "Failed waiting for inhibit shutdown lock");
    }

    ctx.bound(rt.services().stop(services::KUBELET)).await?;

    let teardown_ctx = ctx.with_timeout(options.pod_teardown_timeout);

    // Pod-network sandboxes first: their CNI teardown may still need host
    // network sandboxes that are stopped in the second pass.
    teardown_ctx
        .bound(
            rt.containers()
                .stop_and_remove_pod_sandboxes(action, &[NamespaceMode::Pod]),
        )
        .await?;

    teardown_ctx
        .bound(rt.containers().stop_and_remove_pod_sandboxes(action, &[]))
        .await
}

async fn wait_for_lifecycle_finalizers(ctx: &ExecutionContext) -> MachinedResult<()> {
    let lifecycle = ctx.runtime().lifecycle();
    let ctx = ctx.with_timeout(ctx.runtime().options().lifecycle_finalizers_timeout);

    loop {
        if ctx.bound(lifecycle.teardown()).await? {
            break;
        }
        ctx.bound(lifecycle.wait_finalizers_empty()).await?;
    }

    ctx.bound(lifecycle.destroy()).await
}

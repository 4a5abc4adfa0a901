//! Tasks: node membership in the cluster.

use crate::context::ExecutionContext;
use crate::pipeline::Task;
use crate::retry::RetryPolicy;
use crate::runtime::constants::{services, timeouts};
use async_trait::async_trait;
use machined_shared::{MachinedError, MachinedResult};
use std::path::Path;
use std::time::Duration;

/// `Ok(false)` if `path` does not exist.
fn exists(path: &Path) -> MachinedResult<bool> {
    match std::fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Cordon the node and evict its workloads.
pub struct CordonAndDrainNode;

#[async_trait]
impl Task for CordonAndDrainNode {
    fn name(&self) -> &str {
        "cordon_and_drain_node"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();

        // Without a kubelet client certificate the node never joined.
        if !exists(&rt.options().kubelet_client_cert)? {
            tracing::info!("Node has not joined the cluster, skipping drain");
            return Ok(());
        }

        let node = rt.node_name()?;
        let client = ctx.bound(rt.cluster().kubelet_client()).await?;

        tracing::info!(node = %node, "Cordoning and draining node");
        ctx.bound(client.cordon_and_drain(&node)).await
    }
}

/// Make the node schedulable again once it reports ready.
pub struct UncordonNode;

#[async_trait]
impl Task for UncordonNode {
    fn name(&self) -> &str {
        "uncordon_node"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let node = rt.node_name()?;

        let client = RetryPolicy::constant(Duration::from_secs(timeouts::KUBELET_CLIENT_SECS))
            .with_units(Duration::from_secs(1))
            .with_error_logging(true)
            .retry_with_context(ctx, move || async move {
                rt.cluster()
                    .kubelet_client()
                    .await
                    .map_err(MachinedError::expected)
            })
            .await?;

        ctx.bound(client.wait_until_ready(&node)).await?;
        ctx.bound(client.uncordon(&node, false)).await?;

        tracing::info!(node = %node, "Uncordoned node");
        Ok(())
    }
}

/// Label (and, unless workloads are allowed there, taint) the node as a
/// control-plane member.
pub struct LabelNodeAsControlPlane;

#[async_trait]
impl Task for LabelNodeAsControlPlane {
    fn name(&self) -> &str {
        "label_node_as_control_plane"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();
        let config = rt.require_config()?;
        let node = rt.node_name()?;
        let taint = !config.cluster.schedule_on_control_planes;

        let client = ctx.bound(rt.cluster().admin_client(&config.cluster)).await?;
        let (client, node_ref) = (client.as_ref(), node.as_str());

        RetryPolicy::constant(rt.options().node_ready_timeout)
            .with_units(Duration::from_secs(3))
            .retry_with_context(ctx, move || async move {
                client
                    .label_node_as_control_plane(node_ref, taint)
                    .await
                    .map_err(MachinedError::expected)
            })
            .await
            .map_err(|e| {
                if e.is_context_error() {
                    e
                } else {
                    MachinedError::Cluster(format!(
                        "failed to label node as control-plane: {}",
                        e
                    ))
                }
            })?;

        tracing::info!(node = %node, taint, "Labeled node as control-plane");
        Ok(())
    }
}

/// Remove this node from the membership store.
///
/// Skipped when the node never joined (no member data directory) or the
/// membership service never ran on this boot.
pub struct LeaveEtcd;

#[async_trait]
impl Task for LeaveEtcd {
    fn name(&self) -> &str {
        "leave_etcd"
    }

    async fn run(&self, ctx: &ExecutionContext) -> MachinedResult<()> {
        let rt = ctx.runtime();

        let member_dir = rt.options().etcd_data_path.join("member");
        if !exists(&member_dir)? {
            tracing::info!(path = %member_dir.display(), "No membership data, skipping leave");
            return Ok(());
        }

        let state = rt.services().state(services::ETCD);
        if !state.is_some_and(|s| s.was_active()) {
            tracing::info!(state = ?state, "Membership service was not started, skipping leave");
            return Ok(());
        }

        let client = RetryPolicy::constant(Duration::from_secs(timeouts::MEMBERSHIP_CONNECT_SECS))
            .with_units(Duration::from_secs(1))
            .with_error_logging(true)
            .retry_with_context(ctx, move || async move {
                rt.membership()
                    .connect()
                    .await
                    .map_err(MachinedError::expected)
            })
            .await?;

        ctx.bound(client.leave_cluster(true))
            .await
            .map_err(|e| match e {
                e if e.is_context_error() => e,
                MachinedError::Membership(msg) => MachinedError::Membership(msg),
                e => MachinedError::Membership(format!("failed to leave cluster: {}", e)),
            })?;

        tracing::info!("Left the membership store");
        Ok(())
    }
}

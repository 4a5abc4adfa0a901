//! Sequencer: resolves a [`Sequence`] to its phase table and runs it.
//!
//! Only one sequence runs at a time. A second `run` while one is in flight
//! fails with [`MachinedError::Locked`] instead of queueing.

mod data;
mod tables;

pub use data::{
    RebootMode, RebootRequest, ResetRequest, Sequence, SequenceData, UpgradeRequest,
};
pub use tables::phases_for;

use crate::context::{Canceller, ExecutionContext};
use crate::events::EventKind;
use crate::pipeline::{Phase, SequenceExecutor, SequenceMetrics};
use crate::runtime::Runtime;
use machined_shared::{MachinedError, MachinedResult, RebootCmd};
use parking_lot::Mutex;
use tracing::Instrument;

/// How a sequence ended when it did not fail.
#[derive(Debug)]
pub enum SequenceOutcome {
    Completed { metrics: SequenceMetrics },
    /// The caller must now execute `cmd` (restart, power-off, halt, kexec).
    Restart {
        cmd: RebootCmd,
        metrics: SequenceMetrics,
    },
}

impl SequenceOutcome {
    pub fn metrics(&self) -> &SequenceMetrics {
        match self {
            SequenceOutcome::Completed { metrics } | SequenceOutcome::Restart { metrics, .. } => {
                metrics
            }
        }
    }

    pub fn restart_cmd(&self) -> Option<RebootCmd> {
        match self {
            SequenceOutcome::Completed { .. } => None,
            SequenceOutcome::Restart { cmd, .. } => Some(*cmd),
        }
    }
}

pub struct Sequencer {
    runtime: Runtime,
    lock: tokio::sync::Mutex<()>,
    current: Mutex<Option<Canceller>>,
}

impl Sequencer {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            lock: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Phase table `sequence` would run, for diagnostics.
    pub fn plan(sequence: Sequence) -> Vec<Phase> {
        phases_for(sequence)
    }

    /// Cancel the sequence in flight, if any.
    pub fn cancel(&self) {
        if let Some(canceller) = self.current.lock().as_ref() {
            canceller.cancel();
        }
    }

    pub async fn run(
        &self,
        sequence: Sequence,
        data: SequenceData,
    ) -> MachinedResult<SequenceOutcome> {
        let _guard = self.lock.try_lock().map_err(|_| {
            MachinedError::Locked(format!("cannot run {}: another sequence is running", sequence))
        })?;

        let sequence = Self::resolve(sequence, &data)?;
        let run_id = ulid::Ulid::new();
        let span = tracing::info_span!("sequence", sequence = %sequence, run_id = %run_id);

        let (ctx, canceller) = ExecutionContext::new(self.runtime.clone(), sequence, data);
        let ctx = ctx.with_span(span.clone());
        *self.current.lock() = Some(canceller);

        let phases = phases_for(sequence);
        tracing::info!(parent: &span, phases = phases.len(), "Sequence starting");

        let result = SequenceExecutor::execute(&phases, &ctx)
            .instrument(span.clone())
            .await;

        *self.current.lock() = None;

        match result {
            Ok(metrics) => {
                tracing::info!(
                    parent: &span,
                    duration_ms = metrics.total_duration_ms as u64,
                    restart = ?metrics.restart,
                    "Sequence finished"
                );
                Ok(match metrics.restart {
                    Some(cmd) => SequenceOutcome::Restart { cmd, metrics },
                    None => SequenceOutcome::Completed { metrics },
                })
            }
            Err(err) => {
                tracing::error!(parent: &span, error = %err, "Sequence failed");
                if Self::is_user_triggered(sequence) {
                    self.runtime
                        .fire(EventKind::Failure, format!("{} failed: {}", sequence, err));
                }
                Err(err)
            }
        }
    }

    /// A staged upgrade runs the dedicated table instead of the in-place one.
    fn resolve(sequence: Sequence, data: &SequenceData) -> MachinedResult<Sequence> {
        match sequence {
            Sequence::Upgrade | Sequence::StageUpgrade | Sequence::MaintenanceUpgrade => {
                let request = data.upgrade()?;
                if sequence == Sequence::Upgrade && request.stage {
                    return Ok(Sequence::StageUpgrade);
                }
                Ok(sequence)
            }
            Sequence::Reset => data.reset().map(|_| sequence),
            _ => Ok(sequence),
        }
    }

    /// Boot-path sequences report their own failures from inside the tasks.
    fn is_user_triggered(sequence: Sequence) -> bool {
        !matches!(
            sequence,
            Sequence::Initialize | Sequence::Boot | Sequence::Install
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootloader::{MetaStore, MetaTag};
    use crate::testing::{TestRuntime, drain_events};

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_without_join_powers_off() {
        let harness = TestRuntime::new();
        let sequencer = Sequencer::new(harness.runtime());
        let mut events = sequencer.runtime().events().subscribe();

        let outcome = sequencer
            .run(Sequence::Shutdown, SequenceData::None)
            .await
            .unwrap();

        assert_eq!(outcome.restart_cmd(), Some(RebootCmd::PowerOff));
        assert!(harness.cluster.calls().is_empty());

        let metrics = outcome.metrics();
        assert!(metrics.task_duration_ms("cordon_and_drain_node").is_some());
        assert!(metrics.task_duration_ms("stop_all_pods").is_some());
        assert!(metrics.task_duration_ms("force_cleanup").is_some());
        assert_eq!(harness.containers.passes().len(), 2);

        assert_eq!(
            drain_events(&mut events),
            vec![EventKind::Restart {
                cmd: RebootCmd::PowerOff
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_install_reports_failure_once() {
        let harness = TestRuntime::new().installed(false, None);
        harness.installer.fail("pull failed");
        let sequencer = Sequencer::new(harness.runtime());
        let mut events = sequencer.runtime().events().subscribe();

        let err = sequencer
            .run(Sequence::Install, SequenceData::None)
            .await
            .unwrap_err();
        assert!(matches!(err, MachinedError::Install(_)));

        let kinds = drain_events(&mut events);
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::Failure).count(), 1);
        assert!(!kinds.contains(&EventKind::Installed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_upgrade_reports_failure() {
        let harness = TestRuntime::new();
        harness.disks.create_partitions();
        harness.installer.fail("bad image");
        let sequencer = Sequencer::new(harness.runtime());
        let mut events = sequencer.runtime().events().subscribe();

        let data = SequenceData::Upgrade(UpgradeRequest {
            image: "installer:v2".into(),
            ..Default::default()
        });
        assert!(sequencer.run(Sequence::Upgrade, data).await.is_err());

        assert_eq!(drain_events(&mut events), vec![EventKind::Failure]);
        assert_eq!(
            harness.services.calls(),
            vec!["stop:kubelet", "stop_rdeps:cri,udevd,trustd"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_staged_upgrade_is_redirected() {
        let harness = TestRuntime::new();
        let sequencer = Sequencer::new(harness.runtime());

        let data = SequenceData::Upgrade(UpgradeRequest {
            image: "installer:v2".into(),
            stage: true,
            ..Default::default()
        });
        let outcome = sequencer.run(Sequence::Upgrade, data).await.unwrap();

        assert_eq!(outcome.restart_cmd(), Some(RebootCmd::Restart));
        assert!(outcome.metrics().task_duration_ms("stage_upgrade").is_some());
        assert!(outcome.metrics().task_duration_ms("upgrade").is_none());
        assert!(harness.installer.runs().is_empty());
        assert_eq!(
            harness.meta.read_tag(MetaTag::StagedInstallImageRef).unwrap(),
            Some(b"installer:v2".to_vec())
        );
    }

    #[tokio::test]
    async fn test_upgrade_requires_request() {
        let harness = TestRuntime::new();
        let sequencer = Sequencer::new(harness.runtime());

        let err = sequencer
            .run(Sequence::Upgrade, SequenceData::None)
            .await
            .unwrap_err();
        assert!(matches!(err, MachinedError::InvalidSequenceData(_)));
    }

    #[tokio::test]
    async fn test_concurrent_run_is_locked() {
        let harness = TestRuntime::new();
        let sequencer = Sequencer::new(harness.runtime());

        let _held = sequencer.lock.try_lock().unwrap();
        let err = sequencer
            .run(Sequence::Shutdown, SequenceData::None)
            .await
            .unwrap_err();
        assert!(matches!(err, MachinedError::Locked(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_boot_wait() {
        let harness = TestRuntime::new();
        harness.services.set_auto_run(false);
        let sequencer = std::sync::Arc::new(Sequencer::new(harness.runtime()));

        let handle = tokio::spawn({
            let sequencer = sequencer.clone();
            async move { sequencer.run(Sequence::Boot, SequenceData::None).await }
        });

        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        sequencer.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, MachinedError::Cancelled));
    }
}

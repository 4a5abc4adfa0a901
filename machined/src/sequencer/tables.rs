//! Static phase tables, one per [`Sequence`].
//!
//! Tables are built once per run from fixed code. Run-time variation
//! (installed state, request flags, platform mode, machine role) is
//! expressed as phase predicates, never by editing the table.

use super::Sequence;
use crate::context::ExecutionContext;
use crate::pipeline::{Phase, pause_on_failure};
use crate::tasks::{
    CordonAndDrainNode, ForceCleanup, Install, KexecPrepare, LabelNodeAsControlPlane, LeaveEtcd,
    LoadConfig, MountPartition, MountStatePartition, Reboot, RemoveAllPods, ResetSystemDisk,
    ResetSystemDiskSpec, SaveConfig, SaveStateEncryptionConfig, Shutdown, StageUpgrade,
    StartAllServices, StartDBus, StopAllPods, StopAllServices, StopDBus, StopServicesEphemeral,
    UncordonNode, UnmountPartition, UnmountPodMounts, UnmountSystemDiskBindMounts,
    UpdateBootloader, Upgrade, ValidateConfig, VerifyDiskAvailability, task,
};

// ============================================================================
// PREDICATES
// ============================================================================

fn on_host(ctx: &ExecutionContext) -> bool {
    !ctx.runtime().platform_mode().is_container()
}

fn installed_on_host(ctx: &ExecutionContext) -> bool {
    ctx.runtime().machine().installed() && on_host(ctx)
}

fn not_installed_on_host(ctx: &ExecutionContext) -> bool {
    !ctx.runtime().machine().installed() && on_host(ctx)
}

fn install_pending(ctx: &ExecutionContext) -> bool {
    let machine = ctx.runtime().machine();
    (!machine.installed() || machine.is_install_staged()) && on_host(ctx)
}

fn is_control_plane(ctx: &ExecutionContext) -> bool {
    ctx.runtime()
        .config()
        .is_some_and(|config| config.machine.machine_type.is_control_plane())
}

fn upgrade_leaves_cluster(ctx: &ExecutionContext) -> bool {
    ctx.data().upgrade().is_ok_and(|req| !req.preserve) && is_control_plane(ctx)
}

fn reset_is_graceful(ctx: &ExecutionContext) -> bool {
    ctx.data().reset().is_ok_and(|req| req.graceful)
}

fn reset_is_forced(ctx: &ExecutionContext) -> bool {
    !reset_is_graceful(ctx)
}

fn reset_leaves_cluster(ctx: &ExecutionContext) -> bool {
    reset_is_graceful(ctx) && is_control_plane(ctx)
}

fn reset_drains(ctx: &ExecutionContext) -> bool {
    reset_is_graceful(ctx) && on_host(ctx)
}

fn reset_whole_disk(ctx: &ExecutionContext) -> bool {
    ctx.data()
        .reset()
        .is_ok_and(|req| req.system_disk_targets.is_empty())
        && on_host(ctx)
}

fn reset_targets(ctx: &ExecutionContext) -> bool {
    ctx.data()
        .reset()
        .is_ok_and(|req| !req.system_disk_targets.is_empty())
        && on_host(ctx)
}

fn reset_then_reboot(ctx: &ExecutionContext) -> bool {
    ctx.data().reset().is_ok_and(|req| req.reboot)
}

fn reset_then_power_off(ctx: &ExecutionContext) -> bool {
    !reset_then_reboot(ctx)
}

// ============================================================================
// SHARED PHASE GROUPS
// ============================================================================

fn stop_dbus() -> Phase {
    Phase::parallel("stop_dbus", vec![task(StopDBus)])
}

fn stop_everything() -> Phase {
    Phase::parallel("stop_everything", vec![task(StopAllServices)])
}

/// Stage the default boot entry for kexec; a failure falls back to a
/// firmware reboot.
fn kexec() -> Phase {
    Phase::sequential(
        "kexec",
        vec![
            task(MountPartition::boot()),
            task(KexecPrepare),
            task(UnmountPartition::boot()),
        ],
    )
    .best_effort()
    .when(on_host)
}

fn unmount_user_mounts() -> Vec<Phase> {
    vec![
        Phase::parallel("unmount_pod_mounts", vec![task(UnmountPodMounts)]).when(on_host),
        Phase::parallel("unmount_bind_mounts", vec![task(UnmountSystemDiskBindMounts)])
            .when(on_host),
    ]
}

fn unmount_system() -> Phase {
    Phase::sequential(
        "unmount_system",
        vec![
            task(UnmountPartition::ephemeral()),
            task(UnmountPartition::state()),
        ],
    )
    .when(on_host)
}

fn force_cleanup() -> Phase {
    Phase::parallel("force_cleanup", vec![task(ForceCleanup)])
        .best_effort()
        .when(on_host)
}

/// Graceful teardown shared by shutdown and reboot.
fn teardown() -> Vec<Phase> {
    let mut phases = vec![
        Phase::parallel("drain", vec![task(CordonAndDrainNode)]).when(on_host),
        Phase::parallel("cleanup", vec![task(StopAllPods)]),
        stop_dbus(),
    ];
    phases.push(stop_everything());
    phases.extend(unmount_user_mounts());
    phases.push(unmount_system());
    phases
}

// ============================================================================
// TABLES
// ============================================================================

/// Phase table for `sequence`.
pub fn phases_for(sequence: Sequence) -> Vec<Phase> {
    match sequence {
        Sequence::Initialize => initialize(),
        Sequence::Boot => boot(),
        Sequence::Install => install(),
        Sequence::Upgrade => upgrade(),
        Sequence::StageUpgrade => stage_upgrade(),
        Sequence::MaintenanceUpgrade => maintenance_upgrade(),
        Sequence::Shutdown => shutdown(),
        Sequence::Reboot => reboot(),
        Sequence::Reset => reset(),
    }
}

fn initialize() -> Vec<Phase> {
    vec![
        Phase::parallel("mount_state", vec![task(MountStatePartition)]).when(installed_on_host),
        Phase::parallel("config", vec![pause_on_failure(task(LoadConfig))]),
        Phase::parallel("unmount_state", vec![task(UnmountPartition::state())])
            .when(not_installed_on_host),
    ]
}

fn boot() -> Vec<Phase> {
    vec![
        Phase::parallel("save_state_encryption", vec![task(SaveStateEncryptionConfig)])
            .when(on_host),
        Phase::parallel("mount_state", vec![task(MountStatePartition)]).when(on_host),
        Phase::parallel("validate_config", vec![pause_on_failure(task(ValidateConfig))]),
        Phase::parallel("save_config", vec![task(SaveConfig)]),
        Phase::parallel("mount_ephemeral", vec![task(MountPartition::ephemeral())]).when(on_host),
        Phase::parallel("dbus", vec![task(StartDBus)]),
        Phase::parallel(
            "start_everything",
            vec![pause_on_failure(task(StartAllServices))],
        ),
        Phase::parallel("label_control_plane", vec![task(LabelNodeAsControlPlane)])
            .when(is_control_plane),
        Phase::parallel("uncordon", vec![task(UncordonNode)]),
        Phase::parallel("bootloader", vec![task(UpdateBootloader)]).when(on_host),
    ]
}

fn install() -> Vec<Phase> {
    vec![
        Phase::parallel("install", vec![task(Install)]).when(install_pending),
        Phase::parallel("save_state_encryption", vec![task(SaveStateEncryptionConfig)])
            .when(install_pending),
        Phase::parallel("mount_state", vec![task(MountStatePartition)]).when(install_pending),
        Phase::parallel("save_config", vec![task(SaveConfig)]).when(install_pending),
        Phase::parallel("unmount_state", vec![task(UnmountPartition::state())])
            .when(install_pending),
        stop_everything().when(install_pending),
        kexec().when(install_pending),
        Phase::parallel("reboot", vec![task(Reboot)]).when(install_pending),
    ]
}

fn upgrade() -> Vec<Phase> {
    let mut phases = vec![
        Phase::parallel("drain", vec![task(CordonAndDrainNode)]).when(on_host),
        Phase::parallel("cleanup", vec![task(RemoveAllPods)]),
        Phase::parallel("leave", vec![task(LeaveEtcd)]).when(upgrade_leaves_cluster),
        stop_dbus(),
        Phase::parallel("stop_services", vec![task(StopServicesEphemeral)]),
    ];
    phases.extend(unmount_user_mounts());
    phases.push(unmount_system());
    phases.extend([
        Phase::parallel("verify_disk", vec![task(VerifyDiskAvailability)]).when(on_host),
        Phase::parallel("upgrade", vec![task(Upgrade)]),
        kexec(),
        stop_everything(),
        Phase::parallel("reboot", vec![task(Reboot)]),
    ]);
    phases
}

fn stage_upgrade() -> Vec<Phase> {
    let mut phases = vec![
        Phase::parallel("stage", vec![task(StageUpgrade)]),
        Phase::parallel("cleanup", vec![task(StopAllPods)]),
        stop_dbus(),
        stop_everything(),
    ];
    phases.extend(unmount_user_mounts());
    phases.push(unmount_system());
    phases.extend([
        kexec(),
        force_cleanup(),
        Phase::parallel("reboot", vec![task(Reboot)]),
    ]);
    phases
}

fn maintenance_upgrade() -> Vec<Phase> {
    vec![
        Phase::parallel("verify_disk", vec![task(VerifyDiskAvailability)]).when(on_host),
        Phase::parallel("upgrade", vec![task(Upgrade)]),
        stop_everything(),
        Phase::parallel("reboot", vec![task(Reboot)]),
    ]
}

fn shutdown() -> Vec<Phase> {
    let mut phases = teardown();
    phases.extend([
        force_cleanup(),
        Phase::parallel("shutdown", vec![task(Shutdown)]),
    ]);
    phases
}

fn reboot() -> Vec<Phase> {
    let mut phases = vec![
        Phase::parallel("drain", vec![task(CordonAndDrainNode)]).when(on_host),
        Phase::parallel("cleanup", vec![task(StopAllPods)]),
        stop_dbus(),
        kexec(),
        stop_everything(),
    ];
    phases.extend(unmount_user_mounts());
    phases.extend([
        unmount_system(),
        force_cleanup(),
        Phase::parallel("reboot", vec![task(Reboot)]),
    ]);
    phases
}

fn reset() -> Vec<Phase> {
    let mut phases = vec![
        Phase::parallel("drain", vec![task(CordonAndDrainNode)]).when(reset_drains),
        Phase::parallel("cleanup", vec![task(RemoveAllPods)]).when(reset_is_graceful),
        Phase::parallel("cleanup", vec![task(StopAllPods)]).when(reset_is_forced),
        Phase::parallel("leave", vec![task(LeaveEtcd)]).when(reset_leaves_cluster),
        stop_dbus(),
        stop_everything(),
    ];
    phases.extend(unmount_user_mounts());
    phases.extend([
        unmount_system(),
        force_cleanup(),
        Phase::parallel("reset", vec![task(ResetSystemDisk)]).when(reset_whole_disk),
        Phase::parallel("reset_spec", vec![task(ResetSystemDiskSpec)]).when(reset_targets),
        Phase::parallel("reboot", vec![task(Reboot)]).when(reset_then_reboot),
        Phase::parallel("shutdown", vec![task(Shutdown)]).when(reset_then_power_off),
    ]);
    phases
}

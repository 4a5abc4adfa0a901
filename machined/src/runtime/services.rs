//! Service supervisor interface.
//!
//! The supervisor owns long-running daemons. The sequencer only asks it to
//! load, start and stop services and reads back their last observed state.

use crate::runtime::constants::services;
use async_trait::async_trait;
use machined_shared::MachinedResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Waiting,
    Preparing,
    Running,
    Stopping,
    Finished,
    Failed,
}

impl ServiceState {
    /// The service was started at some point and may hold cluster membership.
    pub fn was_active(self) -> bool {
        matches!(
            self,
            ServiceState::Running | ServiceState::Stopping | ServiceState::Failed
        )
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Waiting => "Waiting",
            ServiceState::Preparing => "Preparing",
            ServiceState::Running => "Running",
            ServiceState::Stopping => "Stopping",
            ServiceState::Finished => "Finished",
            ServiceState::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Target of a service wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    Up,
    Down,
}

impl StateEvent {
    pub fn satisfied_by(self, state: ServiceState) -> bool {
        match self {
            StateEvent::Up => state == ServiceState::Running,
            StateEvent::Down => matches!(state, ServiceState::Finished | ServiceState::Failed),
        }
    }
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::Up => write!(f, "up"),
            StateEvent::Down => write!(f, "down"),
        }
    }
}

/// Services the sequencer knows how to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemService {
    Cri,
    Udevd,
    Trustd,
    Kubelet,
    Etcd { bootstrap: bool },
}

impl SystemService {
    pub fn id(&self) -> &'static str {
        match self {
            SystemService::Cri => services::CRI,
            SystemService::Udevd => services::UDEVD,
            SystemService::Trustd => services::TRUSTD,
            SystemService::Kubelet => services::KUBELET,
            SystemService::Etcd { .. } => services::ETCD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub id: String,
    pub state: ServiceState,
}

#[async_trait]
pub trait ServiceSupervisor: Send + Sync {
    /// Register a service without starting it.
    async fn load(&self, service: SystemService) -> MachinedResult<()>;

    async fn load_and_start(&self, service: SystemService) -> MachinedResult<()>;

    async fn stop(&self, id: &str) -> MachinedResult<()>;

    /// Stop the named services and everything that depends on them.
    async fn stop_with_reverse_dependencies(&self, ids: &[&str]) -> MachinedResult<()>;

    /// Stop every loaded service.
    async fn shutdown(&self) -> MachinedResult<()>;

    fn list(&self) -> Vec<ServiceSnapshot>;

    fn state(&self, id: &str) -> Option<ServiceState>;
}

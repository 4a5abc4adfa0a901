//! Error taxonomy for lifecycle sequencing.
//!
//! Errors fall into three groups:
//! - fatal: anything that reaches the sequencer unmodified aborts the sequence
//! - expected: wrapped in [`MachinedError::Expected`] and retried by a retry policy
//! - terminal: [`MachinedError::Reboot`] ends a sequence on purpose

use crate::power::RebootCmd;
use thiserror::Error;

pub type MachinedResult<T> = Result<T, MachinedError>;

#[derive(Debug, Error)]
pub enum MachinedError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("mount error: {0}")]
    Mount(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("cluster error: {0}")]
    Cluster(String),

    #[error("membership error: {0}")]
    Membership(String),

    #[error("install error: {0}")]
    Install(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unexpected sequence data: {0}")]
    InvalidSequenceData(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("no configuration source available")]
    NoConfigSource,

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("context cancelled")]
    Cancelled,

    #[error("another sequence is already running: {0}")]
    Locked(String),

    /// Transient failure; retry policies keep going while they see this.
    #[error("{0}")]
    Expected(Box<MachinedError>),

    /// A task asked the caller to reboot, power off, halt or kexec.
    #[error("reboot requested: {0}")]
    Reboot(RebootCmd),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MachinedError {
    /// Mark an error as transient.
    pub fn expected(err: impl Into<MachinedError>) -> Self {
        match err.into() {
            already @ MachinedError::Expected(_) => already,
            other => MachinedError::Expected(Box::new(other)),
        }
    }

    pub fn is_expected(&self) -> bool {
        matches!(self, MachinedError::Expected(_))
    }

    /// Strip the transient marker, if any.
    pub fn into_inner(self) -> MachinedError {
        match self {
            MachinedError::Expected(inner) => *inner,
            other => other,
        }
    }

    /// Reboot command carried by a terminal error.
    pub fn reboot_cmd(&self) -> Option<RebootCmd> {
        match self {
            MachinedError::Reboot(cmd) => Some(*cmd),
            _ => None,
        }
    }

    /// Cancellation or deadline expiry of the ambient context.
    pub fn is_context_error(&self) -> bool {
        matches!(
            self,
            MachinedError::Cancelled | MachinedError::DeadlineExceeded(_)
        )
    }
}

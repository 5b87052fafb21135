// Typed errors at module boundaries. Binaries collect these behind anyhow::Result; library code
// propagates them with `?`.

use crate::job::JobStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("could not start command: {0}")]
    CouldNotStart(String),
    #[error("command failed: {0}")]
    Failed(String),
    #[error("command timed out: {0}")]
    Hung(String),
    #[error("internal error running command: {0}")]
    Internal(String),
}

// The one error kind spec.md treats as a bug rather than an environmental failure: a caller asked
// for a transition the state machine table does not allow. See scheduler::Core::run, which logs
// and aborts the current loop pass rather than unwinding the whole daemon.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("illegal transition from {from:?} to {to:?}")]
pub struct IllegalTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn job: {0}")]
    SpawnFailed(String),
    #[error("no such pid under management: {0}")]
    UnknownPid(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ControlSurfaceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

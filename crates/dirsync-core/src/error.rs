use dirsync_primitives::CsnError;
use thiserror::Error;

use crate::directory::DirectoryError;

/// Errors the core engine can surface from a single tick or a single
/// applied operation. Per spec.md §7, everything here is recoverable
/// within the core; the caller (the source state machine) maps each
/// variant to a reschedule decision.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    Csn(#[from] CsnError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("refresh already in progress on this database")]
    RefreshBusy,

    #[error("cookie commit was aborted by shutdown")]
    ShutdownDuringCommit,

    #[error("no ancestor could be materialized above {0}")]
    GlueChainBroken(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

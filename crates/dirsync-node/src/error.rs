use dirsync_core::CoreError;
use thiserror::Error;

/// Errors a source's tick can surface internally, before being folded
/// into a [`crate::source::TickOutcome`] (spec §7: everything but fatal
/// configuration is recoverable within the core).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NodeError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("configuration rejected: {0}")]
    FatalConfiguration(String),
}

pub type NodeResult<T> = Result<T, NodeError>;

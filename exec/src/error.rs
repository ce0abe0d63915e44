use std::io;

use ctx_types::StreamKind;
use thiserror::Error;

/// Failures that prevent an invocation from producing a result.
///
/// Natural non-zero exits, timeouts, cancellations and limit breaches are not
/// errors; they are folded into the returned result.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command is empty")]
    EmptyCommand,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to capture {stream}")]
    Capture { stream: StreamKind },
    #[error("failed to allocate termination group: {0}")]
    Group(#[source] io::Error),
    #[error("streaming task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ExecError {
    /// True for spawn failures caused by a missing executable.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExecError::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

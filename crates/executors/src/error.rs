use thiserror::Error;

/// Failure classes a caller of `RunContainer` must be able to distinguish
/// (spec §4.3).
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container exited non-zero with no parseable output: {0}")]
    ExitNonZeroNoOutput(String),
    #[error("failed to parse container output: {0}")]
    OutputParseFailure(String),
    #[error("container invocation was cancelled")]
    ContextCancelled,
    #[error("container invocation exceeded its deadline")]
    ContextDeadlineExceeded,
    #[error("failed to spawn container runtime: {0}")]
    SpawnFailure(String),
}

use thiserror::Error;

/// Every variant carries the combined subprocess output verbatim, per
/// spec §4.4: "every returned error includes that combined output verbatim
/// for diagnosis."
#[derive(Debug, Error)]
pub enum GitOpsError {
    #[error("git executable not found on PATH")]
    NotAvailable,
    #[error("rebase conflict: {0}")]
    Conflict(String),
    #[error("git command failed: {0}")]
    CommandFailed(String),
}

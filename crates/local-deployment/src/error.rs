use thiserror::Error;

use wharf_db::StoreError;
use wharf_executors::ContainerError;
use wharf_services::GitOpsError;

/// Internal failure type for Runner-phase helpers. Never crosses the
/// `Deployment` trait boundary: every failure is translated into a `failed`
/// task transition plus an `error` event (spec §7 "never surfaced as
/// unhandled failures").
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Git(#[from] GitOpsError),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

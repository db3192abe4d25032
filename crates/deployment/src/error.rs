use thiserror::Error;
use wharf_db::StoreError;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("state violation: {0}")]
    StateViolation(String),
}

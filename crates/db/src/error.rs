use thiserror::Error;

/// Errors returned by the Store. `NotFound` is a distinguishable sentinel
/// (spec §9 "Error sentinel") so the HTTP facade can map it to 404 without
/// string matching.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found")]
    NotFound,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("state violation: {0}")]
    StateViolation(String),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
}

use serde::{Deserialize, Serialize};

/// A single line of merged turn output, as produced by the container driver
/// and consumed by the `GET /api/tasks/{id}/logs` live-tail endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogMsg {
    Stdout(String),
    Stderr(String),
    Finished,
}

impl LogMsg {
    /// Render as a line for the `text/plain` log stream. `Finished` renders
    /// to nothing; callers close the response body on receipt instead.
    pub fn to_plain_line(&self) -> Option<String> {
        match self {
            LogMsg::Stdout(line) => Some(line.clone()),
            LogMsg::Stderr(line) => Some(format!("[stderr] {line}")),
            LogMsg::Finished => None,
        }
    }
}

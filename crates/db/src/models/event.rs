use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StateChange,
    Output,
    Feedback,
    Error,
    System,
}

/// Append-only audit entry attached to a task (spec §3 "Event").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub task_id: Uuid,
    pub kind: EventKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

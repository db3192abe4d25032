use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
}

/// The agent's declared stdout schema (spec §9 "Opaque agent"). The final
/// `result` document on the stream is authoritative; intermediate
/// streaming-delta/tool-call messages are never interpreted beyond that.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerOutput {
    pub result: Option<String>,
    pub session_id: Option<String>,
    pub stop_reason: Option<String>,
    pub subtype: Option<String>,
    pub is_error: bool,
    pub total_cost_usd: f64,
    pub usage: TurnUsage,
}

/// One-shot container invocation request (spec §4.3 `RunContainer`).
pub struct RunContainerRequest {
    pub task_id: Uuid,
    pub prompt: String,
    pub session_id: Option<String>,
    /// host repo path -> worktree directory, bind-mounted one per entry.
    pub mounts: HashMap<String, String>,
    /// When set, only these host->container mounts are used (targeted
    /// resolution, e.g. the conflict resolver mounting a single worktree).
    pub mount_override: Option<HashMap<String, String>>,
    pub timeout_minutes: u32,
}

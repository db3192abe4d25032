use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_TIMEOUT_MINUTES: u32 = 1;
pub const MAX_TIMEOUT_MINUTES: u32 = 1440;
pub const DEFAULT_TIMEOUT_MINUTES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    Waiting,
    Done,
    Failed,
    Cancelled,
    Committing,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Committing => "committing",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cost_usd: f64,
}

impl Usage {
    pub fn accumulate(&mut self, delta: &Usage) {
        self.input_tokens += delta.input_tokens;
        self.output_tokens += delta.output_tokens;
        self.cache_read_tokens += delta.cache_read_tokens;
        self.cache_creation_tokens += delta.cache_creation_tokens;
        self.cost_usd += delta.cost_usd;
    }
}

/// A unit of work executed by the agent (spec §3 "Task").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub prompt: String,
    pub title: Option<String>,
    pub prompt_history: Vec<String>,
    pub status: TaskStatus,
    pub archived: bool,
    pub session_id: Option<String>,
    pub fresh_start: bool,
    pub result: Option<String>,
    pub stop_reason: Option<String>,
    pub turns: u32,
    pub timeout_minutes: u32,
    pub usage: Usage,
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// host repo path -> per-task worktree directory
    pub worktree_paths: HashMap<String, String>,
    /// `task/<uuid8>`, empty until worktrees are created
    pub branch_name: String,
    /// host repo path -> commit hash after merge
    pub commit_hashes: HashMap<String, String>,
    /// host repo path -> default-branch HEAD captured just before merge
    pub base_commit_hashes: HashMap<String, String>,
}

impl Task {
    pub fn new(prompt: String, timeout_minutes: u32, position: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            prompt,
            title: None,
            prompt_history: Vec::new(),
            status: TaskStatus::Backlog,
            archived: false,
            session_id: None,
            fresh_start: false,
            result: None,
            stop_reason: None,
            turns: 0,
            timeout_minutes: clamp_timeout(timeout_minutes),
            usage: Usage::default(),
            position,
            created_at: now,
            updated_at: now,
            worktree_paths: HashMap::new(),
            branch_name: String::new(),
            commit_hashes: HashMap::new(),
            base_commit_hashes: HashMap::new(),
        }
    }

    pub fn branch_for(id: Uuid) -> String {
        format!("task/{}", short_uuid(id))
    }
}

pub fn short_uuid(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Timeout is always within `[1, 1440]` minutes; out-of-range values are
/// clamped, never rejected (spec §8 invariant 5).
pub fn clamp_timeout(minutes: u32) -> u32 {
    minutes.clamp(MIN_TIMEOUT_MINUTES, MAX_TIMEOUT_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_timeout_clamps_out_of_range_values() {
        assert_eq!(clamp_timeout(0), MIN_TIMEOUT_MINUTES);
        assert_eq!(clamp_timeout(5000), MAX_TIMEOUT_MINUTES);
        assert_eq!(clamp_timeout(30), 30);
    }

    #[test]
    fn branch_for_has_expected_shape() {
        let id = Uuid::new_v4();
        let branch = Task::branch_for(id);
        assert!(branch.starts_with("task/"));
        assert_eq!(branch.len(), "task/".len() + 8);
    }
}

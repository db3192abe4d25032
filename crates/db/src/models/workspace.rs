use serde::{Deserialize, Serialize};

/// A host directory the user exposed at startup. Not persisted in the task
/// model; enumerated live by the GitOps status probe (spec §3 "Workspace").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub path: String,
    pub name: String,
    pub is_git_repo: bool,
    pub has_remote: bool,
    pub branch: Option<String>,
    pub ahead_count: u32,
    pub behind_count: u32,
}

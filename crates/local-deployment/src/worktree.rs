use std::collections::HashMap;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use wharf_services::{GitOps, RealGitRunner};

use crate::error::RunnerError;
use crate::snapshot::snapshot_to_throwaway_repo;

/// Creates one worktree per configured workspace under
/// `<config>/worktrees/<task-uuid>/<basename>` (spec §4.5 step 2). Git
/// workspaces get a real `git worktree`; non-git workspaces get a snapshot
/// turned into a throwaway repo.
pub fn prepare_worktrees(
    git_ops: &GitOps<RealGitRunner>,
    workspaces: &[PathBuf],
    worktrees_root: &Path,
    task_id: Uuid,
    branch_name: &str,
) -> Result<HashMap<String, String>, RunnerError> {
    let mut worktree_paths = HashMap::new();

    for workspace in workspaces {
        let basename = workspace
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "workspace".to_string());
        let worktree_path = worktrees_root.join(task_id.to_string()).join(&basename);

        if git_ops.is_git_repo(workspace) {
            git_ops.create_worktree(workspace, &worktree_path, branch_name)?;
        } else {
            snapshot_to_throwaway_repo(git_ops, workspace, &worktree_path)?;
        }

        worktree_paths.insert(workspace.display().to_string(), worktree_path.display().to_string());
    }

    Ok(worktree_paths)
}

/// Removes every worktree for a task, best-effort (spec §4.6 phase 4,
/// §4.7 orphan pruning). `RemoveWorktree` is idempotent so a worktree
/// that is already gone is not an error.
pub fn cleanup_worktrees(
    git_ops: &GitOps<RealGitRunner>,
    workspaces: &[PathBuf],
    worktree_paths: &HashMap<String, String>,
    branch_name: &str,
) {
    for workspace in workspaces {
        let key = workspace.display().to_string();
        let Some(worktree_path) = worktree_paths.get(&key) else {
            continue;
        };
        if let Err(e) = git_ops.remove_worktree(workspace, Path::new(worktree_path), branch_name) {
            tracing::warn!(workspace = %key, error = %e, "failed to remove worktree");
        }
    }
}

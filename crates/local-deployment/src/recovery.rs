use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::json;
use uuid::Uuid;

use wharf_db::{EventKind, Store, TaskStatus};
use wharf_services::{GitOps, RealGitRunner};

use crate::error::RunnerError;

/// Marks every task still `in_progress`/`committing` on startup as `failed`
/// (spec §4.7 "Orphaned task reconciliation"). No container is assumed to
/// survive a restart.
pub async fn reconcile_orphaned_tasks(store: &Store) -> Result<(), RunnerError> {
    for task in store.list_tasks(true).await? {
        if !matches!(task.status, TaskStatus::InProgress | TaskStatus::Committing) {
            continue;
        }
        let from = task.status.as_str();
        tracing::warn!(task_id = %task.id, from, "reconciling orphaned task on startup");

        store.update_task_status(task.id, TaskStatus::Failed).await?;
        store
            .insert_event(
                task.id,
                EventKind::Error,
                json!({ "error": format!("server restarted while task was {from}") }),
            )
            .await?;
        store
            .insert_event(
                task.id,
                EventKind::StateChange,
                json!({ "from": from, "to": "failed" }),
            )
            .await?;
    }
    Ok(())
}

/// Removes worktree directories that don't belong to any currently-known
/// task (spec §4.7 "Orphaned worktree pruning"). Aborts without deleting
/// anything if the task set can't be listed, to avoid destroying live data.
pub async fn prune_orphaned_worktrees(
    store: &Store,
    git_ops: &GitOps<RealGitRunner>,
    workspaces: &[PathBuf],
    worktrees_root: &Path,
) -> Result<(), RunnerError> {
    let known_ids: HashSet<Uuid> = store.list_tasks(true).await?.iter().map(|t| t.id).collect();

    let mut entries = match tokio::fs::read_dir(worktrees_root).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok(task_id) = Uuid::parse_str(name) else {
            continue;
        };
        if known_ids.contains(&task_id) {
            continue;
        }

        tracing::info!(task_id = %task_id, "pruning orphaned worktree");
        let branch_name = format!("task/{}", &task_id.simple().to_string()[..8]);
        for workspace in workspaces {
            let basename = workspace
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "workspace".to_string());
            let worktree_path = path.join(&basename);
            if let Err(e) = git_ops.remove_worktree(workspace, &worktree_path, &branch_name) {
                tracing::warn!(task_id = %task_id, error = %e, "failed to git-remove orphaned worktree");
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(task_id = %task_id, error = %e, "failed to remove orphaned worktree directory");
            }
        }
    }

    Ok(())
}

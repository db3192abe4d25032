use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use wharf_db::{EventKind, Store, Task};
use wharf_executors::{ContainerError, RunContainerRequest};
use wharf_services::{CommitMessageGenerator, CommitValidator, GitOpsError, WarningSeverity};
use wharf_utils::atomic_file::write_atomic;

use crate::error::RunnerError;
use crate::snapshot::extract_snapshot_to_workspace;
use crate::worktree::cleanup_worktrees;
use crate::LocalDeployment;

/// Rebase-conflict retry budget (spec §9 "Open question — container
/// monitor" sibling decision: the source leaves this implicit too).
pub const MAX_REBASE_RETRIES: u32 = 3;
/// Spec calls for a 90s auxiliary timeout; rounded up to whole minutes since
/// the container driver's timeout is minute-granular.
const COMMIT_MESSAGE_TIMEOUT_MINUTES: u32 = 2;
const CONFLICT_RESOLVER_TIMEOUT_MINUTES: u32 = 5;

/// The four-phase commit pipeline (spec §4.6), run after a task's terminal
/// artifact is owned by the Runner. Advisory: failures record an `error`
/// event and abort the pipeline but never re-enter the task state machine.
pub async fn run_commit_pipeline(deployment: LocalDeployment, task_id: Uuid, session_id: Option<String>) {
    if let Err(e) = run_commit_pipeline_inner(&deployment, task_id, session_id).await {
        tracing::error!(task_id = %task_id, error = %e, "commit pipeline failed");
        let _ = deployment
            .store
            .insert_event(task_id, EventKind::Error, json!({ "error": e.to_string() }))
            .await;
    }
}

async fn run_commit_pipeline_inner(
    deployment: &LocalDeployment,
    task_id: Uuid,
    session_id: Option<String>,
) -> Result<(), RunnerError> {
    let store = &deployment.store;
    let git_ops = &deployment.git_ops;
    let task = store.get_task(task_id).await?;

    store
        .insert_event(task_id, EventKind::Output, json!({ "message": "Phase 1/4: staging and committing" }))
        .await?;

    let mut dirty: Vec<(String, PathBuf)> = Vec::new();
    let mut stats = String::new();
    let mut logs = String::new();

    for (host, worktree) in &task.worktree_paths {
        let worktree_path = PathBuf::from(worktree);
        let repo = Path::new(host);
        if git_ops.is_git_repo(repo) {
            git_ops.add_all(&worktree_path)?;
            if !git_ops.has_changes(&worktree_path)? {
                continue;
            }
            stats.push_str(&git_ops.diff_stat(&worktree_path)?);
            logs.push_str(&git_ops.recent_log(&worktree_path, 3)?);
            dirty.push((host.clone(), worktree_path));
        } else {
            // Non-git snapshots have no staging concept; they are always
            // carried through to phase 2's extraction step.
            dirty.push((host.clone(), worktree_path));
        }
    }

    let synthesized = synthesize_commit_message(deployment, &task, &stats, &logs).await;
    let synthesized = validate_synthesized_message(store, task_id, synthesized).await;
    let message = CommitMessageGenerator::new().generate(&task.prompt, synthesized.as_deref(), "wharf");

    for (host, worktree_path) in &dirty {
        if git_ops.is_git_repo(Path::new(host)) {
            git_ops.commit(worktree_path, &message)?;
        }
    }

    store
        .insert_event(task_id, EventKind::Output, json!({ "message": "Phase 2/4: rebase and merge" }))
        .await?;

    let mut commit_hashes = HashMap::new();
    let mut base_commit_hashes = HashMap::new();

    for (host, worktree_path) in &dirty {
        let repo = Path::new(host);

        if !git_ops.is_git_repo(repo) {
            extract_snapshot_to_workspace(worktree_path, repo)?;
            let snapshot_head = git_ops.get_commit_hash(worktree_path)?;
            commit_hashes.insert(host.clone(), snapshot_head);
            continue;
        }

        let default_branch = git_ops.default_branch(repo);
        if !git_ops.has_commits_ahead_of(worktree_path, &default_branch)? {
            continue;
        }

        // Serializes against any other task rebasing/merging into this same
        // repo's default branch (spec §5).
        let lock = deployment.repo_lock(host).await;
        let _guard = lock.lock().await;

        let mut attempt = 0;
        loop {
            match git_ops.rebase_onto_default(repo, worktree_path) {
                Ok(()) => break,
                Err(GitOpsError::Conflict(_)) if attempt < MAX_REBASE_RETRIES => {
                    attempt += 1;
                    resolve_conflicts(deployment, task_id, host, worktree_path, session_id.clone()).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let base_hash = git_ops.get_commit_hash(repo)?;
        base_commit_hashes.insert(host.clone(), base_hash);

        git_ops.ff_merge(repo, &task.branch_name)?;
        let merged_hash = git_ops.get_commit_hash(repo)?;
        commit_hashes.insert(host.clone(), merged_hash);
    }

    store
        .insert_event(task_id, EventKind::Output, json!({ "message": "Phase 3/4: persisting results" }))
        .await?;
    store.update_task_commit_hashes(task_id, commit_hashes.clone()).await?;
    store.update_task_base_commit_hashes(task_id, base_commit_hashes.clone()).await?;
    write_progress_md(store, task_id, &task, &commit_hashes).await?;

    store
        .insert_event(task_id, EventKind::Output, json!({ "message": "Phase 4/4: cleaning up worktrees" }))
        .await?;
    cleanup_worktrees(git_ops, &deployment.workspaces, &task.worktree_paths, &task.branch_name);

    Ok(())
}

/// Runs the synthesized message through `CommitValidator` before it's
/// eligible to be accepted: an `Error`-severity warning (conversational AI
/// filler, etc.) discards it so the caller falls back to the prompt-derived
/// message instead. Lower-severity warnings are recorded but don't block it.
async fn validate_synthesized_message(store: &Store, task_id: Uuid, synthesized: Option<String>) -> Option<String> {
    let message = synthesized?;
    let warnings = CommitValidator::validate(&message);
    for warning in &warnings {
        let _ = store
            .insert_event(
                task_id,
                EventKind::System,
                json!({ "commit_message_warning": warning.message, "severity": format!("{:?}", warning.severity) }),
            )
            .await;
    }
    if warnings.iter().any(|w| w.severity == WarningSeverity::Error) {
        None
    } else {
        Some(message)
    }
}

/// Short-lived auxiliary container that synthesizes a commit message from
/// the task prompt, aggregated `diff --stat`, and aggregated recent log
/// (spec §4.6 phase 1). `None` on any failure; the caller falls back.
async fn synthesize_commit_message(deployment: &LocalDeployment, task: &Task, stats: &str, logs: &str) -> Option<String> {
    if stats.trim().is_empty() {
        return None;
    }

    let prompt = format!(
        "Summarize this change as a single-line git commit message.\n\nTask: {}\n\nDiff stat:\n{}\n\nRecent log:\n{}",
        task.prompt, stats, logs
    );
    let req = RunContainerRequest {
        task_id: task.id,
        prompt,
        session_id: None,
        mounts: HashMap::new(),
        mount_override: Some(HashMap::new()),
        timeout_minutes: COMMIT_MESSAGE_TIMEOUT_MINUTES,
    };

    let (output, _, _) = deployment
        .container_driver
        .run_container(&deployment.container_params, req)
        .await
        .ok()?;

    if output.is_error {
        return None;
    }
    output.result.filter(|r| !r.trim().is_empty())
}

/// Invokes the agent against a single conflicted worktree with a scripted
/// prompt, reusing the task's already-running session (spec §4.6.1).
async fn resolve_conflicts(
    deployment: &LocalDeployment,
    task_id: Uuid,
    host: &str,
    worktree_path: &Path,
    session_id: Option<String>,
) -> Result<(), RunnerError> {
    let prompt = "A rebase conflict occurred in this worktree. Run `git status`, resolve \
                  the conflicts, `git add` the resolved files, then run `git rebase --continue`."
        .to_string();

    let mut mount_override = HashMap::new();
    mount_override.insert(host.to_string(), worktree_path.display().to_string());

    let req = RunContainerRequest {
        task_id,
        prompt,
        session_id,
        mounts: HashMap::new(),
        mount_override: Some(mount_override),
        timeout_minutes: CONFLICT_RESOLVER_TIMEOUT_MINUTES,
    };

    let (output, stdout, stderr) = deployment
        .container_driver
        .run_container(&deployment.container_params, req)
        .await?;

    let turn = deployment.store.increment_turns(task_id).await?.turns;
    deployment.store.save_turn_output(task_id, turn, &stdout, &stderr).await?;

    if output.is_error {
        return Err(RunnerError::Container(ContainerError::ExitNonZeroNoOutput(
            "conflict resolver reported an error".to_string(),
        )));
    }
    Ok(())
}

async fn write_progress_md(
    store: &Store,
    task_id: Uuid,
    task: &Task,
    commit_hashes: &HashMap<String, String>,
) -> Result<(), RunnerError> {
    let path = store.task_dir(task_id).join("PROGRESS.md");
    let mut contents = tokio::fs::read_to_string(&path).await.unwrap_or_default();

    contents.push_str(&format!("\n## {}\n\nPrompt: {}\n\n", Utc::now().to_rfc3339(), task.prompt));
    for (repo, hash) in commit_hashes {
        contents.push_str(&format!("- `{repo}`: {hash}\n"));
    }

    write_atomic(&path, contents.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use wharf_db::{EventKind, Store, TaskStatus};
    use wharf_executors::container::ContainerParams;
    use wharf_executors::{ContainerDriver, ContainerError, ContainerOutput};
    use wharf_services::{GitOps, RealGitRunner};
    use wharf_utils::config::{Config, LogFormat};

    use super::*;
    use crate::monitor::ContainerTracker;

    struct UnusedDriver;

    #[async_trait]
    impl ContainerDriver for UnusedDriver {
        async fn run_container(
            &self,
            _params: &ContainerParams,
            _req: RunContainerRequest,
        ) -> Result<(ContainerOutput, Vec<u8>, Vec<u8>), ContainerError> {
            panic!("no worktree has changes, so the commit-message container must never be invoked");
        }
    }

    async fn deployment() -> (tempfile::TempDir, LocalDeployment) {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let config = Config {
            data_dir: data_dir.clone(),
            config_dir: dir.path().join("config"),
            env_file: None,
            container_cmd: "docker".to_string(),
            sandbox_image: "wharf-sandbox:latest".to_string(),
            addr: "127.0.0.1:0".to_string(),
            log_format: LogFormat::Text,
            no_color: true,
        };
        let store = Arc::new(Store::load(data_dir).await.unwrap());
        let deployment = LocalDeployment {
            store,
            git_ops: Arc::new(GitOps::new(RealGitRunner::new())),
            container_driver: Arc::new(UnusedDriver),
            container_params: ContainerParams {
                container_cmd: "docker".to_string(),
                image: "wharf-sandbox:latest".to_string(),
                env_file: None,
                config_dir: config.config_dir.clone(),
            },
            config,
            workspaces: Arc::new(Vec::new()),
            running: ContainerTracker::new(),
            repo_locks: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        };
        (dir, deployment)
    }

    #[tokio::test]
    async fn pipeline_is_a_no_op_when_task_has_no_worktrees() {
        let (_dir, deployment) = deployment().await;
        let task = deployment.store.create_task("nothing to commit".into(), 5).await.unwrap();
        deployment.store.update_task_status(task.id, TaskStatus::Done).await.unwrap();

        run_commit_pipeline_inner(&deployment, task.id, None).await.unwrap();

        let finished = deployment.store.get_task(task.id).await.unwrap();
        assert!(finished.commit_hashes.is_empty());
        let events = deployment.store.get_events(task.id).await.unwrap();
        assert!(events.iter().all(|e| e.kind != EventKind::Error));
    }
}

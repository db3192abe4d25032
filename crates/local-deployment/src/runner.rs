use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::json;
use uuid::Uuid;

use wharf_db::{EventKind, Task, TaskStatus, Usage};
use wharf_executors::RunContainerRequest;

use crate::{commit, LocalDeployment};

/// Per-task execution pipeline: the turn loop (spec §4.5). Preconditions:
/// the task is already `in_progress` (the caller transitions it before
/// spawning this). Never panics out of the spawned task: a panic anywhere
/// in `run_inner` is caught and turned into a `failed` transition.
pub async fn run(
    deployment: LocalDeployment,
    task_id: Uuid,
    prompt_override: String,
    session_id_override: Option<String>,
    resumed_from_waiting: bool,
) {
    let result = AssertUnwindSafe(run_inner(
        &deployment,
        task_id,
        prompt_override,
        session_id_override,
        resumed_from_waiting,
    ))
    .catch_unwind()
    .await;

    if result.is_err() {
        tracing::error!(task_id = %task_id, "runner panicked; marking task failed");
        let _ = deployment.store.update_task_status(task_id, TaskStatus::Failed).await;
        let _ = deployment
            .store
            .insert_event(task_id, EventKind::Error, json!({ "error": "runner panicked" }))
            .await;
    }
}

async fn run_inner(
    deployment: &LocalDeployment,
    task_id: Uuid,
    prompt_override: String,
    session_id_override: Option<String>,
    resumed_from_waiting: bool,
) -> Result<(), crate::RunnerError> {
    let store = &deployment.store;
    let task = store.get_task(task_id).await?;

    let branch_name = if task.branch_name.is_empty() {
        Task::branch_for(task_id)
    } else {
        task.branch_name.clone()
    };

    let worktree_paths = if task.worktree_paths.is_empty() {
        let worktrees_root = deployment.config.worktrees_dir();
        let prepared = match crate::worktree::prepare_worktrees(
            &deployment.git_ops,
            &deployment.workspaces,
            &worktrees_root,
            task_id,
            &branch_name,
        ) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "worktree preparation failed");
                store.update_task_status(task_id, TaskStatus::Failed).await?;
                store
                    .insert_event(
                        task_id,
                        EventKind::Error,
                        json!({ "error": format!("worktree preparation failed: {e}") }),
                    )
                    .await?;
                return Ok(());
            }
        };
        store.update_task_worktrees(task_id, prepared.clone(), branch_name.clone()).await?;
        prepared
    } else {
        task.worktree_paths.clone()
    };

    let mut effective_prompt = prompt_override;
    let mut session_id = session_id_override;

    // One context for the whole Run (spec §4.5 step 1, §5): the budget
    // shrinks across auto-continued turns instead of resetting on each one,
    // so a task stuck looping on `max_tokens`/`pause_turn` still times out.
    let run_deadline = Instant::now() + Duration::from_secs(u64::from(task.timeout_minutes) * 60);

    loop {
        let remaining = run_deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            store.update_task_status(task_id, TaskStatus::Failed).await?;
            store
                .insert_event(task_id, EventKind::Error, json!({ "error": "run exceeded its timeout" }))
                .await?;
            store
                .insert_event(
                    task_id,
                    EventKind::StateChange,
                    json!({ "from": "in_progress", "to": "failed" }),
                )
                .await?;
            return Ok(());
        }
        // The container driver's timeout is minute-granular; round up so the
        // last partial minute of budget still gets a turn.
        let remaining_minutes = remaining.as_secs().div_ceil(60).max(1) as u32;

        store.increment_turns(task_id).await?;
        let turn = store.get_task(task_id).await?.turns;

        deployment.running.mark_running(task_id).await;
        let req = RunContainerRequest {
            task_id,
            prompt: effective_prompt.clone(),
            session_id: session_id.clone(),
            mounts: worktree_paths.clone(),
            mount_override: None,
            timeout_minutes: remaining_minutes,
        };
        let outcome = deployment
            .container_driver
            .run_container(&deployment.container_params, req)
            .await;
        deployment.running.clear(task_id).await;

        let (output, stdout, stderr) = match outcome {
            Ok(ok) => ok,
            Err(e) => {
                // A concurrent cancel kills the container while the turn is
                // in flight, which surfaces here as a driver error; never
                // stomp the already-terminal `Cancelled` state with `Failed`.
                if store.get_task(task_id).await?.status == TaskStatus::Cancelled {
                    return Ok(());
                }
                store.update_task_status(task_id, TaskStatus::Failed).await?;
                store
                    .insert_event(task_id, EventKind::Error, json!({ "error": e.to_string() }))
                    .await?;
                store
                    .insert_event(
                        task_id,
                        EventKind::StateChange,
                        json!({ "from": "in_progress", "to": "failed" }),
                    )
                    .await?;
                return Ok(());
            }
        };

        store.save_turn_output(task_id, turn, &stdout, &stderr).await?;
        store
            .insert_event(
                task_id,
                EventKind::Output,
                json!({
                    "result": output.result,
                    "stop_reason": output.stop_reason,
                    "session_id": output.session_id,
                }),
            )
            .await?;

        if let Some(sid) = output.session_id.clone().filter(|s| !s.is_empty()) {
            session_id = Some(sid.clone());
            store.update_task_session(task_id, Some(sid)).await?;
        }
        store
            .update_task_result(task_id, output.result.clone(), output.stop_reason.clone())
            .await?;
        store
            .accumulate_task_usage(
                task_id,
                Usage {
                    input_tokens: output.usage.input,
                    output_tokens: output.usage.output,
                    cache_read_tokens: output.usage.cache_read,
                    cache_creation_tokens: output.usage.cache_creation,
                    cost_usd: output.total_cost_usd,
                },
            )
            .await?;

        // Another actor (an explicit cancel) may have finalized the task
        // while the container was running; exit without overwriting it.
        if store.get_task(task_id).await?.status == TaskStatus::Cancelled {
            return Ok(());
        }

        match output.stop_reason.as_deref() {
            Some("end_turn") => {
                store.update_task_status(task_id, TaskStatus::Done).await?;
                store
                    .insert_event(
                        task_id,
                        EventKind::StateChange,
                        json!({ "from": "in_progress", "to": "done" }),
                    )
                    .await?;
                if resumed_from_waiting {
                    if let Some(sid) = session_id.clone() {
                        let commit_deployment = deployment.clone();
                        tokio::spawn(async move {
                            commit::run_commit_pipeline(commit_deployment, task_id, Some(sid)).await;
                        });
                    }
                }
                return Ok(());
            }
            Some("max_tokens") | Some("pause_turn") => {
                effective_prompt = String::new();
                continue;
            }
            _ => {
                if output.is_error {
                    store.update_task_status(task_id, TaskStatus::Failed).await?;
                    store
                        .insert_event(
                            task_id,
                            EventKind::StateChange,
                            json!({ "from": "in_progress", "to": "failed" }),
                        )
                        .await?;
                } else if output.subtype.as_deref() == Some("success") {
                    store.update_task_status(task_id, TaskStatus::Done).await?;
                    store
                        .insert_event(
                            task_id,
                            EventKind::StateChange,
                            json!({ "from": "in_progress", "to": "done" }),
                        )
                        .await?;
                    if resumed_from_waiting {
                        if let Some(sid) = session_id.clone() {
                            let commit_deployment = deployment.clone();
                            tokio::spawn(async move {
                                commit::run_commit_pipeline(commit_deployment, task_id, Some(sid)).await;
                            });
                        }
                    }
                } else {
                    store.update_task_status(task_id, TaskStatus::Waiting).await?;
                    store
                        .insert_event(
                            task_id,
                            EventKind::StateChange,
                            json!({ "from": "in_progress", "to": "waiting" }),
                        )
                        .await?;
                }
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use wharf_db::Store;
    use wharf_executors::container::ContainerParams;
    use wharf_executors::{ContainerDriver, ContainerError, ContainerOutput, TurnUsage};
    use wharf_services::{GitOps, RealGitRunner};
    use wharf_utils::config::{Config, LogFormat};

    use super::*;
    use crate::monitor::ContainerTracker;

    /// Replays one scripted [`ContainerOutput`] per call, looping on the
    /// last entry once the script is exhausted.
    struct ScriptedDriver {
        script: Vec<ContainerOutput>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ContainerDriver for ScriptedDriver {
        async fn run_container(
            &self,
            _params: &ContainerParams,
            _req: RunContainerRequest,
        ) -> Result<(ContainerOutput, Vec<u8>, Vec<u8>), ContainerError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let output = self.script[idx.min(self.script.len() - 1)].clone();
            Ok((output, Vec::new(), Vec::new()))
        }
    }

    fn end_turn_output() -> ContainerOutput {
        ContainerOutput {
            result: Some("done".to_string()),
            session_id: Some("sess-1".to_string()),
            stop_reason: Some("end_turn".to_string()),
            subtype: None,
            is_error: false,
            total_cost_usd: 0.02,
            usage: TurnUsage { input: 10, output: 5, cache_read: 0, cache_creation: 0 },
        }
    }

    async fn deployment_with_script(script: Vec<ContainerOutput>) -> (tempfile::TempDir, LocalDeployment) {
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
            container_driver: Arc::new(ScriptedDriver { script, calls: AtomicU32::new(0) }),
            container_params: ContainerParams {
                container_cmd: "docker".to_string(),
                image: "wharf-sandbox:latest".to_string(),
                env_file: None,
                config_dir: config.config_dir.clone(),
            },
            config,
            workspaces: Arc::new(Vec::<PathBuf>::new()),
            running: ContainerTracker::new(),
            repo_locks: Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new())),
        };
        (dir, deployment)
    }

    #[tokio::test]
    async fn end_turn_marks_task_done() {
        let (_dir, deployment) = deployment_with_script(vec![end_turn_output()]).await;
        let task = deployment.store.create_task("do the thing".into(), 5).await.unwrap();
        deployment.store.update_task_status(task.id, TaskStatus::InProgress).await.unwrap();

        run(deployment.clone(), task.id, task.prompt.clone(), None, false).await;

        let finished = deployment.store.get_task(task.id).await.unwrap();
        assert_eq!(finished.status, TaskStatus::Done);
        assert_eq!(finished.turns, 1);
        assert_eq!(finished.usage.input_tokens, 10);
    }

    #[tokio::test]
    async fn container_failure_marks_task_failed() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let store = Arc::new(Store::load(data_dir.clone()).await.unwrap());

        struct FailingDriver;
        #[async_trait]
        impl ContainerDriver for FailingDriver {
            async fn run_container(
                &self,
                _params: &ContainerParams,
                _req: RunContainerRequest,
            ) -> Result<(ContainerOutput, Vec<u8>, Vec<u8>), ContainerError> {
                Err(ContainerError::ExitNonZeroNoOutput("boom".to_string()))
            }
        }

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
        let deployment = LocalDeployment {
            store,
            git_ops: Arc::new(GitOps::new(RealGitRunner::new())),
            container_driver: Arc::new(FailingDriver),
            container_params: ContainerParams {
                container_cmd: "docker".to_string(),
                image: "wharf-sandbox:latest".to_string(),
                env_file: None,
                config_dir: config.config_dir.clone(),
            },
            config,
            workspaces: Arc::new(Vec::new()),
            running: ContainerTracker::new(),
            repo_locks: Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new())),
        };

        let task = deployment.store.create_task("will fail".into(), 5).await.unwrap();
        deployment.store.update_task_status(task.id, TaskStatus::InProgress).await.unwrap();

        run(deployment.clone(), task.id, task.prompt.clone(), None, false).await;

        let finished = deployment.store.get_task(task.id).await.unwrap();
        assert_eq!(finished.status, TaskStatus::Failed);
    }
}

pub mod commit;
pub mod error;
pub mod monitor;
pub mod recovery;
pub mod runner;
pub mod snapshot;
pub mod worktree;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use wharf_db::{Store, TaskStatus};
use wharf_deployment::{Deployment, DeploymentError};
use wharf_executors::container::ContainerParams;
use wharf_executors::{ContainerDriver, RealContainerDriver};
use wharf_services::{GitOps, RealGitRunner};
use wharf_utils::config::Config;

pub use error::RunnerError;

/// The concrete `Deployment`: owns the Store, GitOps, and container driver,
/// and drives the Runner's turn loop and commit pipeline. Cheaply `Clone`
/// (every field is an `Arc` or copy-cheap) so orchestration methods can hand
/// an owned copy to a spawned task.
#[derive(Clone)]
pub struct LocalDeployment {
    pub(crate) store: Arc<Store>,
    pub(crate) git_ops: Arc<GitOps<RealGitRunner>>,
    pub(crate) container_driver: Arc<dyn ContainerDriver>,
    pub(crate) container_params: ContainerParams,
    pub(crate) config: Config,
    pub(crate) workspaces: Arc<Vec<PathBuf>>,
    pub(crate) running: monitor::ContainerTracker,
    /// Per-host-repo advisory locks (spec §5): serializes the rebase/ff-merge
    /// window so two tasks merging into the same default branch never race.
    pub(crate) repo_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LocalDeployment {
    pub async fn new(config: Config, workspaces: Vec<PathBuf>) -> Result<Self, RunnerError> {
        let store = Arc::new(Store::load(config.data_dir.clone()).await?);
        let git_ops = Arc::new(GitOps::new(RealGitRunner::new()));
        let container_driver: Arc<dyn ContainerDriver> = Arc::new(RealContainerDriver::new());
        let container_params = ContainerParams {
            container_cmd: config.container_cmd.clone(),
            image: config.sandbox_image.clone(),
            env_file: config.env_file.clone(),
            config_dir: config.config_dir.clone(),
        };

        Ok(Self {
            store,
            git_ops,
            container_driver,
            container_params,
            config,
            workspaces: Arc::new(workspaces),
            running: monitor::ContainerTracker::new(),
            repo_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Returns the advisory lock guarding `repo`'s default branch, creating
    /// one on first use. Held across the rebase-onto-default + ff-merge
    /// window in the commit pipeline, never across a whole task's lifetime.
    pub(crate) async fn repo_lock(&self, repo: &str) -> Arc<Mutex<()>> {
        let mut locks = self.repo_locks.lock().await;
        locks.entry(repo.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Startup reconciliation (spec §4.7) plus the background container
    /// monitor. Call once after `new`, before serving HTTP traffic.
    pub async fn bootstrap(&self) -> Result<(), RunnerError> {
        recovery::reconcile_orphaned_tasks(&self.store).await?;
        recovery::prune_orphaned_worktrees(
            &self.store,
            &self.git_ops,
            &self.workspaces,
            &self.config.worktrees_dir(),
        )
        .await?;
        monitor::spawn(self.clone());
        Ok(())
    }
}

#[async_trait]
impl Deployment for LocalDeployment {
    fn store(&self) -> &Store {
        &self.store
    }

    fn git_ops(&self) -> &GitOps<RealGitRunner> {
        &self.git_ops
    }

    fn container_driver(&self) -> &dyn ContainerDriver {
        self.container_driver.as_ref()
    }

    fn config(&self) -> &Config {
        &self.config
    }

    fn workspaces(&self) -> &[PathBuf] {
        &self.workspaces
    }

    async fn start_task(&self, task_id: Uuid) -> Result<(), DeploymentError> {
        let task = self.store.update_task_status(task_id, TaskStatus::InProgress).await?;
        let session_id = if task.fresh_start { None } else { task.session_id.clone() };
        let this = self.clone();
        tokio::spawn(async move {
            runner::run(this, task_id, task.prompt.clone(), session_id, false).await;
        });
        Ok(())
    }

    async fn submit_feedback(&self, task_id: Uuid, message: String) -> Result<(), DeploymentError> {
        let task = self.store.get_task(task_id).await?;
        if task.status != TaskStatus::Waiting {
            return Err(DeploymentError::StateViolation(
                "feedback is only accepted while a task is waiting".to_string(),
            ));
        }
        self.store
            .insert_event(
                task_id,
                wharf_db::EventKind::Feedback,
                serde_json::json!({ "message": message }),
            )
            .await?;
        self.store.update_task_status(task_id, TaskStatus::InProgress).await?;

        let this = self.clone();
        tokio::spawn(async move {
            runner::run(this, task_id, message, task.session_id.clone(), true).await;
        });
        Ok(())
    }

    async fn mark_done(&self, task_id: Uuid) -> Result<(), DeploymentError> {
        let task = self.store.get_task(task_id).await?;
        if task.status != TaskStatus::Waiting {
            return Err(DeploymentError::StateViolation(
                "only a waiting task can be marked done directly".to_string(),
            ));
        }
        self.store.update_task_status(task_id, TaskStatus::Done).await?;
        self.store
            .insert_event(
                task_id,
                wharf_db::EventKind::StateChange,
                serde_json::json!({ "from": "waiting", "to": "done" }),
            )
            .await?;

        let this = self.clone();
        let session_id = task.session_id.clone();
        tokio::spawn(async move {
            commit::run_commit_pipeline(this, task_id, session_id).await;
        });
        Ok(())
    }

    async fn cancel_task(&self, task_id: Uuid) -> Result<(), DeploymentError> {
        let task = self.store.get_task(task_id).await?;
        let name = format!("wharf-task-{task_id}");
        let _ = tokio::process::Command::new(&self.container_params.container_cmd)
            .args(["rm", "-f", &name])
            .status()
            .await;
        self.running.clear(task_id).await;

        worktree::cleanup_worktrees(&self.git_ops, &self.workspaces, &task.worktree_paths, &task.branch_name);
        self.store.update_task_status(task_id, TaskStatus::Cancelled).await?;
        self.store
            .insert_event(
                task_id,
                wharf_db::EventKind::StateChange,
                serde_json::json!({ "from": task.status.as_str(), "to": "cancelled" }),
            )
            .await?;
        Ok(())
    }

    async fn resume_task(&self, task_id: Uuid, timeout_minutes: Option<u32>) -> Result<(), DeploymentError> {
        let prior = self.store.get_task(task_id).await?;
        let resumed_from_waiting = prior.status == TaskStatus::Waiting;
        let task = self.store.resume_task(task_id, timeout_minutes).await?;
        let session_id = if task.fresh_start { None } else { task.session_id.clone() };

        let this = self.clone();
        tokio::spawn(async move {
            runner::run(this, task_id, task.prompt.clone(), session_id, resumed_from_waiting).await;
        });
        Ok(())
    }

    async fn retry_task(
        &self,
        task_id: Uuid,
        new_prompt: Option<String>,
        fresh_start: bool,
    ) -> Result<(), DeploymentError> {
        let task = self.store.get_task(task_id).await?;
        let prompt = new_prompt.unwrap_or(task.prompt);
        self.store.reset_task_for_retry(task_id, prompt, fresh_start).await?;
        Ok(())
    }
}

pub mod error;

use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;
use wharf_db::Store;
use wharf_executors::ContainerDriver;
use wharf_services::{GitOps, RealGitRunner};
use wharf_utils::config::Config;

pub use error::DeploymentError;

/// What the HTTP/SSE facade (spec §4.8) calls into. Implemented by
/// `wharf-local-deployment`'s `LocalDeployment`, which owns the Runner.
#[async_trait]
pub trait Deployment: Send + Sync + 'static {
    fn store(&self) -> &Store;
    fn git_ops(&self) -> &GitOps<RealGitRunner>;
    fn container_driver(&self) -> &dyn ContainerDriver;
    fn config(&self) -> &Config;
    fn workspaces(&self) -> &[PathBuf];

    /// `backlog -> in_progress`; spawns the Runner's turn loop.
    async fn start_task(&self, task_id: Uuid) -> Result<(), DeploymentError>;

    /// Appends a feedback event, transitions `waiting -> in_progress`, and
    /// re-enters the turn loop with the feedback as the effective prompt.
    async fn submit_feedback(&self, task_id: Uuid, message: String) -> Result<(), DeploymentError>;

    /// `waiting -> done`; triggers the commit pipeline.
    async fn mark_done(&self, task_id: Uuid) -> Result<(), DeploymentError>;

    /// Kills the task's container (if any) and transitions to `cancelled`.
    async fn cancel_task(&self, task_id: Uuid) -> Result<(), DeploymentError>;

    async fn resume_task(&self, task_id: Uuid, timeout_minutes: Option<u32>) -> Result<(), DeploymentError>;

    async fn retry_task(
        &self,
        task_id: Uuid,
        new_prompt: Option<String>,
        fresh_start: bool,
    ) -> Result<(), DeploymentError>;
}

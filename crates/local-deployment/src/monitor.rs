use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use wharf_db::{EventKind, TaskStatus};

use crate::LocalDeployment;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Tracks which tasks currently have a container in flight, so the
/// background monitor knows which names to expect in `docker ps`.
#[derive(Clone, Default)]
pub struct ContainerTracker {
    inner: Arc<Mutex<HashMap<Uuid, Instant>>>,
}

impl ContainerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_running(&self, task_id: Uuid) {
        self.inner.lock().await.insert(task_id, Instant::now());
    }

    pub async fn clear(&self, task_id: Uuid) {
        self.inner.lock().await.remove(&task_id);
    }

    async fn expected_ids(&self) -> Vec<Uuid> {
        self.inner.lock().await.keys().copied().collect()
    }
}

/// Background container monitor (spec §4.7). Source code leaves the poll
/// interval and grace period implicit; this implementation chooses 5s/30s
/// (recorded as an open-question decision in DESIGN.md).
pub fn spawn(deployment: LocalDeployment) {
    tokio::spawn(async move {
        let mut missing_since: HashMap<Uuid, Instant> = HashMap::new();
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let expected = deployment.running.expected_ids().await;
            if expected.is_empty() {
                missing_since.clear();
                continue;
            }

            let running_names = list_running_container_names(&deployment).await;

            for task_id in expected {
                let name = format!("wharf-task-{task_id}");
                if running_names.contains(&name) {
                    missing_since.remove(&task_id);
                    continue;
                }

                let since = *missing_since.entry(task_id).or_insert_with(Instant::now);
                if since.elapsed() < GRACE_PERIOD {
                    continue;
                }

                missing_since.remove(&task_id);
                deployment.running.clear(task_id).await;

                if let Ok(task) = deployment.store.get_task(task_id).await {
                    if task.status == TaskStatus::InProgress {
                        tracing::warn!(task_id = %task_id, "container disappeared without completing; marking failed");
                        let _ = deployment.store.update_task_status(task_id, TaskStatus::Failed).await;
                        let _ = deployment
                            .store
                            .insert_event(
                                task_id,
                                EventKind::Error,
                                json!({ "error": "container disappeared without completing" }),
                            )
                            .await;
                    }
                }
            }
        }
    });
}

async fn list_running_container_names(deployment: &LocalDeployment) -> HashSet<String> {
    let output = tokio::process::Command::new(&deployment.container_params.container_cmd)
        .args(["ps", "--format", "{{.Names}}"])
        .output()
        .await;

    match output {
        Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout).lines().map(str::to_string).collect(),
        _ => HashSet::new(),
    }
}

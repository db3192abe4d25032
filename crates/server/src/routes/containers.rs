use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use wharf_deployment::Deployment;

use crate::error::ApiError;
use crate::DeploymentImpl;

/// A single running task container, as reported by the container runtime's
/// process list (spec.md §6 `GET /api/containers`).
#[derive(Debug, Serialize)]
pub struct Container {
    pub task_id: Option<Uuid>,
    pub name: String,
    pub image: String,
}

pub fn router() -> Router<DeploymentImpl> {
    Router::new().route("/", get(list_containers))
}

const NAME_PREFIX: &str = "wharf-task-";

pub async fn list_containers(State(deployment): State<DeploymentImpl>) -> Result<Json<Vec<Container>>, ApiError> {
    let output = tokio::process::Command::new(&deployment.config().container_cmd)
        .args(["ps", "--filter", &format!("name={NAME_PREFIX}"), "--format", "{{.Names}}\t{{.Image}}"])
        .output()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if !output.status.success() {
        return Err(ApiError::Internal(String::from_utf8_lossy(&output.stderr).into_owned()));
    }

    let containers = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, '\t');
            let name = parts.next()?.to_string();
            let image = parts.next().unwrap_or_default().to_string();
            let task_id = name.strip_prefix(NAME_PREFIX).and_then(|s| Uuid::parse_str(s).ok());
            Some(Container { task_id, name, image })
        })
        .collect();

    Ok(Json(containers))
}

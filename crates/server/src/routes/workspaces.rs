use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use wharf_db::Workspace;
use wharf_deployment::Deployment;

use crate::error::ApiError;
use crate::DeploymentImpl;

const PROBE_INTERVAL: Duration = Duration::from_secs(3);

pub fn router() -> Router<DeploymentImpl> {
    Router::new().route("/", get(list_workspaces))
}

pub fn git_stream_router() -> Router<DeploymentImpl> {
    Router::new().route("/stream", get(stream_git_status))
}

fn probe_workspaces(deployment: &DeploymentImpl) -> Vec<Workspace> {
    deployment.workspaces().iter().map(|path| deployment.git_ops().workspace_status(path)).collect()
}

pub async fn list_workspaces(State(deployment): State<DeploymentImpl>) -> Result<Json<Vec<Workspace>>, ApiError> {
    Ok(Json(probe_workspaces(&deployment)))
}

#[derive(Debug, Serialize)]
struct WorkspacesSnapshot {
    workspaces: Vec<Workspace>,
}

/// Re-probes every configured workspace's git status on an interval and
/// emits a full snapshot each time (spec §4.8 `GET /api/git/stream`). No
/// dedicated change-notification exists for host-side git state, so polling
/// stands in for the Store's broadcast mechanism here.
pub async fn stream_git_status(
    State(deployment): State<DeploymentImpl>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = async_stream::stream! {
        loop {
            let workspaces = probe_workspaces(&deployment);
            if let Ok(data) = serde_json::to_string(&WorkspacesSnapshot { workspaces }) {
                yield Ok(SseEvent::default().data(data));
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wharf_db::models::task::DEFAULT_TIMEOUT_MINUTES;
use wharf_db::{Event, Task, TaskStatus};
use wharf_deployment::Deployment;
use wharf_utils::log_msg::LogMsg;

use crate::error::ApiError;
use crate::DeploymentImpl;

pub fn router() -> Router<DeploymentImpl> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/stream", get(stream_tasks))
        .route("/generate-titles", post(generate_titles_unimplemented))
        .route("/{id}", axum::routing::patch(update_task).delete(delete_task))
        .route("/{id}/events", get(get_events))
        .route("/{id}/logs", get(stream_logs))
        .route("/{id}/feedback", post(submit_feedback))
        .route("/{id}/done", post(mark_done))
        .route("/{id}/cancel", post(cancel_task))
        .route("/{id}/resume", post(resume_task))
        .route("/{id}/archive", post(archive_task))
        .route("/{id}/unarchive", post(unarchive_task))
        .route("/{id}/sync", post(sync_task))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub include_archived: bool,
}

pub async fn list_tasks(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = deployment.store().list_tasks(query.include_archived).await?;
    Ok(Json(tasks))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub prompt: String,
    #[serde(default)]
    pub timeout: Option<u32>,
}

pub async fn create_task(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = deployment
        .store()
        .create_task(payload.prompt, payload.timeout.unwrap_or(DEFAULT_TIMEOUT_MINUTES))
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub status: Option<TaskStatus>,
    pub position: Option<i64>,
    pub prompt: Option<String>,
    pub timeout: Option<u32>,
    pub fresh_start: Option<bool>,
}

/// The only status transition a bare PATCH is allowed to drive is the
/// operator dragging a backlog card into progress; every other lifecycle
/// move has its own action endpoint (spec §4.8).
pub async fn update_task(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    let current = deployment.store().get_task(id).await?;

    if payload.prompt.is_some() || payload.timeout.is_some() || payload.fresh_start.is_some() {
        deployment
            .store()
            .update_task_backlog(id, payload.prompt, payload.timeout, payload.fresh_start)
            .await?;
    }

    if let Some(position) = payload.position {
        deployment.store().update_task_position(id, position).await?;
    }

    if let Some(status) = payload.status {
        if status != current.status {
            if current.status == TaskStatus::Backlog && status == TaskStatus::InProgress {
                deployment.start_task(id).await?;
            } else {
                return Err(ApiError::BadRequest(format!(
                    "cannot set status to {} via PATCH; use an action endpoint",
                    status.as_str()
                )));
            }
        }
    }

    let task = deployment.store().get_task(id).await?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    deployment.store().delete_task(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_events(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let events = deployment.store().get_events(id).await?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub message: String,
}

pub async fn submit_feedback(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<StatusCode, ApiError> {
    deployment.submit_feedback(id, payload.message).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_done(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    deployment.mark_done(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_task(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    deployment.cancel_task(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Default)]
pub struct ResumeRequest {
    #[serde(default)]
    pub timeout: Option<u32>,
}

pub async fn resume_task(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
    body: Option<Json<ResumeRequest>>,
) -> Result<StatusCode, ApiError> {
    let timeout = body.and_then(|Json(r)| r.timeout);
    deployment.resume_task(id, timeout).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn archive_task(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    deployment.store().set_task_archived(id, true).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unarchive_task(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    deployment.store().set_task_archived(id, false).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Not a state transition: forces a subscriber re-broadcast so clients that
/// polled in via a stale snapshot observe current state immediately.
pub async fn sync_task(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let task = deployment.store().get_task(id).await?;
    deployment.store().update_task_status(id, task.status).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/tasks/generate-titles` depends on an LLM title-generation
/// helper outside the task execution engine's narrow contract (a Non-goal);
/// stubbed to `501` rather than implemented.
pub async fn generate_titles_unimplemented() -> ApiError {
    ApiError::NotImplemented
}

#[derive(Debug, Serialize)]
struct TasksSnapshot {
    tasks: Vec<Task>,
}

pub async fn stream_tasks(
    State(deployment): State<DeploymentImpl>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = async_stream::stream! {
        let (sub_id, mut rx) = deployment.store().subscribe().await;
        loop {
            let tasks = match deployment.store().list_tasks(true).await {
                Ok(t) => t,
                Err(_) => break,
            };
            if let Ok(data) = serde_json::to_string(&TasksSnapshot { tasks }) {
                yield Ok(SseEvent::default().data(data));
            }
            if rx.recv().await.is_none() {
                break;
            }
        }
        deployment.store().unsubscribe(sub_id).await;
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Merges each turn's stdout/stderr in order, live-tailing while the task is
/// still running (spec §4.8). Closes when the task reaches a terminal state
/// or the client disconnects.
pub async fn stream_logs(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    deployment.store().get_task(id).await?;
    let outputs_dir = deployment.store().task_dir(id).join("outputs");

    let stream = async_stream::stream! {
        let mut last_turn = 0u32;
        loop {
            let mut entries = match tokio::fs::read_dir(&outputs_dir).await {
                Ok(e) => e,
                Err(_) => break,
            };
            let mut turns = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                let Some(stem) = name.strip_prefix("turn-").and_then(|s| s.strip_suffix(".json")) else {
                    continue;
                };
                if let Ok(n) = stem.parse::<u32>() {
                    turns.push(n);
                }
            }
            turns.sort_unstable();

            for turn in turns.into_iter().filter(|t| *t > last_turn) {
                let stdout_path = outputs_dir.join(format!("turn-{turn:04}.json"));
                if let Ok(bytes) = tokio::fs::read(&stdout_path).await {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    for line in text.lines() {
                        if let Some(rendered) = LogMsg::Stdout(line.to_string()).to_plain_line() {
                            yield Ok::<_, std::io::Error>(format!("{rendered}\n").into_bytes());
                        }
                    }
                }
                let stderr_path = outputs_dir.join(format!("turn-{turn:04}.stderr.txt"));
                if let Ok(bytes) = tokio::fs::read(&stderr_path).await {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    for line in text.lines() {
                        if let Some(rendered) = LogMsg::Stderr(line.to_string()).to_plain_line() {
                            yield Ok(format!("{rendered}\n").into_bytes());
                        }
                    }
                }
                last_turn = turn;
            }

            let Ok(task) = deployment.store().get_task(id).await else { break };
            if task.status != TaskStatus::InProgress {
                // LogMsg::Finished renders to no text; closing the stream is the signal.
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    };

    let body = axum::body::Body::from_stream(stream);
    Ok(([(axum::http::header::CONTENT_TYPE, "text/plain")], body))
}

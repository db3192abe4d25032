pub mod error;
pub mod routes;

pub type DeploymentImpl = wharf_local_deployment::LocalDeployment;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Builds the full axum app: every route nested under `/api`, plus the
/// liveness probe at `/healthz` (spec.md §6, SPEC_FULL.md §6 additions).
pub fn app(deployment: DeploymentImpl) -> Router {
    Router::new()
        .nest("/api", routes::api_router())
        .merge(routes::health::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(deployment)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use wharf_deployment::Deployment;
    use wharf_utils::config::{Config, LogFormat};

    use super::*;

    async fn test_deployment() -> (tempfile::TempDir, DeploymentImpl) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().join("data"),
            config_dir: dir.path().join("config"),
            env_file: None,
            container_cmd: "docker".to_string(),
            sandbox_image: "wharf-sandbox:latest".to_string(),
            addr: "127.0.0.1:0".to_string(),
            log_format: LogFormat::Text,
            no_color: true,
        };
        let deployment = DeploymentImpl::new(config, Vec::new()).await.unwrap();
        (dir, deployment)
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let (_dir, deployment) = test_deployment().await;
        let app = app(deployment);

        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_then_list_tasks() {
        let (_dir, deployment) = test_deployment().await;
        let app = app(deployment);

        let create = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt":"fix the bug"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create.status(), StatusCode::CREATED);

        let list = app
            .oneshot(Request::builder().uri("/api/tasks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(list.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(list.into_body(), usize::MAX).await.unwrap();
        let tasks: Vec<wharf_db::Task> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].prompt, "fix the bug");
    }

    #[tokio::test]
    async fn patch_rejects_direct_jump_to_done() {
        let (_dir, deployment) = test_deployment().await;
        let task = deployment.store().create_task("one".into(), 5).await.unwrap();
        let app = app(deployment);

        let response = app
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/api/tasks/{}", task.id))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"status":"done"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

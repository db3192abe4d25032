use axum::response::Json;
use axum::routing::get;
use axum::Router;
use wharf_utils::response::ApiResponse;

use crate::DeploymentImpl;

async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::success("OK".to_string()))
}

pub fn router() -> Router<DeploymentImpl> {
    Router::new().route("/healthz", get(health_check))
}

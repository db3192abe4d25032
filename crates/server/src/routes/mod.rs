pub mod containers;
pub mod health;
pub mod tasks;
pub mod workspaces;

use axum::Router;

use crate::DeploymentImpl;

pub fn api_router() -> Router<DeploymentImpl> {
    Router::new()
        .nest("/tasks", tasks::router())
        .nest("/containers", containers::router())
        .nest("/workspaces", workspaces::router())
        .nest("/git", workspaces::git_stream_router())
}

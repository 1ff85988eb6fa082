use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::api::handlers::{self, AppState};
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Project management
        .route("/projects", get(handlers::list_projects::<S>))
        .route("/projects", post(handlers::create_project::<S>))
        .route("/projects/:project_id", get(handlers::get_project::<S>))
        .route(
            "/projects/:project_id",
            delete(handlers::delete_project::<S>),
        )
        // Deployment bucket (staging area for configuration changes)
        .route(
            "/projects/:project_id/bucket",
            get(handlers::get_active_bucket::<S>),
        )
        .route(
            "/projects/:project_id/bucket/items",
            post(handlers::stage_change::<S>),
        )
        .route(
            "/projects/:project_id/bucket/:bucket_id/items/:item_id",
            delete(handlers::remove_item::<S>),
        )
        .route(
            "/projects/:project_id/bucket/:bucket_id/check-conflicts",
            post(handlers::check_conflicts::<S>),
        )
        .route(
            "/projects/:project_id/bucket/:bucket_id/deploy",
            post(handlers::deploy_bucket::<S>),
        )
        .route(
            "/projects/:project_id/bucket/:bucket_id/discard",
            post(handlers::discard_bucket::<S>),
        )
        // Deployment history (append-only, newest first)
        .route(
            "/projects/:project_id/deployments",
            get(handlers::list_deployments::<S>),
        )
        .route(
            "/projects/:project_id/deployments/:deployment_id",
            get(handlers::get_deployment::<S>),
        )
}

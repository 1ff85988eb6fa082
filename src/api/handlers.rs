use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ProtocolError;
use crate::logic::{BucketOperations, ConflictChecker, DeploymentExecutor, DeploymentHistory};
use crate::model::{
    ConflictCheckResult, Deployment, DeploymentBucket, DeploymentFilter, Id, NewChangeItem,
    NewProject, Project,
};
use crate::store::traits::Store;

/// Shared handler state: the store plus the configured executor.
pub struct AppState<S> {
    pub store: Arc<S>,
    pub executor: DeploymentExecutor,
}

impl<S> AppState<S> {
    pub fn new(store: Arc<S>, executor: DeploymentExecutor) -> Self {
        Self { store, executor }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            executor: self.executor.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub dry_run: bool,
}

/// Response of the deploy endpoint. A dry run reports the would-be outcome
/// without a deployment record; a real deploy carries the new record.
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub success: bool,
    pub message: String,
    pub errors: Vec<crate::model::DeploymentError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
}

fn error_response(err: ProtocolError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        ProtocolError::NotFound(_) => StatusCode::NOT_FOUND,
        ProtocolError::InvalidState(_) => StatusCode::CONFLICT,
        ProtocolError::RaceLost => StatusCode::CONFLICT,
        ProtocolError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ProtocolError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::new(&err.to_string())))
}

// Project management

pub async fn list_projects<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<ListResponse<Project>>, (StatusCode, Json<ErrorResponse>)> {
    match state.store.list_projects().await {
        Ok(projects) => Ok(Json(ListResponse {
            total: projects.len(),
            items: projects,
        })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(&e.to_string())),
        )),
    }
}

pub async fn create_project<S: Store>(
    State(state): State<AppState<S>>,
    RequestJson(new_project): RequestJson<NewProject>,
) -> Result<(StatusCode, Json<Project>), (StatusCode, Json<ErrorResponse>)> {
    let project = new_project.into_project();
    match state.store.upsert_project(project.clone()).await {
        Ok(()) => Ok((StatusCode::CREATED, Json(project))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(&e.to_string())),
        )),
    }
}

pub async fn get_project<S: Store>(
    Path(project_id): Path<Id>,
    State(state): State<AppState<S>>,
) -> Result<Json<Project>, (StatusCode, Json<ErrorResponse>)> {
    match state.store.get_project(&project_id).await {
        Ok(Some(project)) => Ok(Json(project)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Project not found")),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(&e.to_string())),
        )),
    }
}

pub async fn delete_project<S: Store>(
    Path(project_id): Path<Id>,
    State(state): State<AppState<S>>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    match state.store.delete_project(&project_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Project not found")),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(&e.to_string())),
        )),
    }
}

// Deployment bucket

/// GET /projects/{project_id}/bucket
/// The active bucket with its conflict view refreshed against production.
pub async fn get_active_bucket<S: Store>(
    Path(project_id): Path<Id>,
    State(state): State<AppState<S>>,
) -> Result<Json<DeploymentBucket>, (StatusCode, Json<ErrorResponse>)> {
    match state.store.get_project(&project_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Project not found")),
            ));
        }
        Err(e) => {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(&e.to_string())),
            ));
        }
    }

    match state.store.get_active_bucket(&project_id).await {
        Ok(Some(mut bucket)) => {
            ConflictChecker::annotate(&*state.store, &mut bucket)
                .await
                .map_err(error_response)?;
            Ok(Json(bucket))
        }
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("No active bucket for this project")),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(&e.to_string())),
        )),
    }
}

/// POST /projects/{project_id}/bucket/items
/// Stage a change; creates the active bucket when none exists. The returned
/// bucket carries the same derived conflict view as the bucket read.
pub async fn stage_change<S: Store>(
    Path(project_id): Path<Id>,
    State(state): State<AppState<S>>,
    RequestJson(request): RequestJson<NewChangeItem>,
) -> Result<(StatusCode, Json<DeploymentBucket>), (StatusCode, Json<ErrorResponse>)> {
    match BucketOperations::stage_change(&*state.store, &project_id, request).await {
        Ok(mut bucket) => {
            ConflictChecker::annotate(&*state.store, &mut bucket)
                .await
                .map_err(error_response)?;
            Ok((StatusCode::CREATED, Json(bucket)))
        }
        Err(e) => Err(error_response(e)),
    }
}

/// DELETE /projects/{project_id}/bucket/{bucket_id}/items/{item_id}
pub async fn remove_item<S: Store>(
    Path((project_id, bucket_id, item_id)): Path<(Id, Id, Id)>,
    State(state): State<AppState<S>>,
) -> Result<Json<DeploymentBucket>, (StatusCode, Json<ErrorResponse>)> {
    match BucketOperations::remove_item(&*state.store, &project_id, &bucket_id, &item_id).await {
        Ok(mut bucket) => {
            ConflictChecker::annotate(&*state.store, &mut bucket)
                .await
                .map_err(error_response)?;
            Ok(Json(bucket))
        }
        Err(e) => Err(error_response(e)),
    }
}

/// POST /projects/{project_id}/bucket/{bucket_id}/check-conflicts
pub async fn check_conflicts<S: Store>(
    Path((project_id, bucket_id)): Path<(Id, Id)>,
    State(state): State<AppState<S>>,
) -> Result<Json<ConflictCheckResult>, (StatusCode, Json<ErrorResponse>)> {
    match ConflictChecker::check(&*state.store, &project_id, &bucket_id).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => Err(error_response(e)),
    }
}

/// POST /projects/{project_id}/bucket/{bucket_id}/deploy
pub async fn deploy_bucket<S: Store>(
    Path((project_id, bucket_id)): Path<(Id, Id)>,
    State(state): State<AppState<S>>,
    RequestJson(request): RequestJson<DeployRequest>,
) -> Result<Json<DeployResponse>, (StatusCode, Json<ErrorResponse>)> {
    if request.dry_run {
        let result = ConflictChecker::check(&*state.store, &project_id, &bucket_id)
            .await
            .map_err(error_response)?;
        let errors = result
            .conflicts
            .iter()
            .map(|c| crate::model::DeploymentError {
                component_name: c.component_name.clone(),
                message: c.message.clone(),
            })
            .collect();
        let message = if result.has_conflicts {
            format!(
                "bucket is stale: base deployment {} is behind production deployment {}",
                result.bucket_base_deployment_id, result.current_deployment_id
            )
        } else {
            "bucket is ready to deploy".to_string()
        };
        return Ok(Json(DeployResponse {
            success: !result.has_conflicts,
            message,
            errors,
            deployment: None,
        }));
    }

    match state
        .executor
        .deploy(&*state.store, &project_id, &bucket_id)
        .await
    {
        Ok(deployment) => {
            let message = format!(
                "deployment {} finished with status {} ({}/{} items applied)",
                deployment.deployment_id,
                deployment.status.as_str(),
                deployment.items_succeeded,
                deployment.items_total
            );
            Ok(Json(DeployResponse {
                success: deployment.status != crate::model::DeploymentStatus::Failed,
                message,
                errors: deployment.errors.clone(),
                deployment: Some(deployment),
            }))
        }
        Err(e) => Err(error_response(e)),
    }
}

/// POST /projects/{project_id}/bucket/{bucket_id}/discard
pub async fn discard_bucket<S: Store>(
    Path((project_id, bucket_id)): Path<(Id, Id)>,
    State(state): State<AppState<S>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    match BucketOperations::discard(&*state.store, &project_id, &bucket_id).await {
        Ok(()) => Ok(Json(serde_json::json!({
            "success": true,
            "message": "Bucket discarded"
        }))),
        Err(e) => Err(error_response(e)),
    }
}

// Deployment history

/// GET /projects/{project_id}/deployments?limit=&status=
pub async fn list_deployments<S: Store>(
    Path(project_id): Path<Id>,
    Query(filter): Query<DeploymentFilter>,
    State(state): State<AppState<S>>,
) -> Result<Json<ListResponse<Deployment>>, (StatusCode, Json<ErrorResponse>)> {
    match DeploymentHistory::list(&*state.store, &project_id, filter).await {
        Ok(deployments) => Ok(Json(ListResponse {
            total: deployments.len(),
            items: deployments,
        })),
        Err(e) => Err(error_response(e)),
    }
}

/// GET /projects/{project_id}/deployments/{deployment_id}
pub async fn get_deployment<S: Store>(
    Path((project_id, deployment_id)): Path<(Id, i64)>,
    State(state): State<AppState<S>>,
) -> Result<Json<Deployment>, (StatusCode, Json<ErrorResponse>)> {
    match DeploymentHistory::get(&*state.store, &project_id, deployment_id).await {
        Ok(deployment) => Ok(Json(deployment)),
        Err(e) => Err(error_response(e)),
    }
}

//! Project list and deletion handlers

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get},
    Json, Router,
};

use super::require_identity;
use crate::{
    error::{ApiError, ApiResult},
    models::Project,
    AppState,
};

/// GET /projects
///
/// The caller's projects, most recently updated first.
pub async fn list_projects(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Project>>> {
    let identity = require_identity(&headers)?;
    Ok(Json(state.gateway.list_projects(&identity).await?))
}

/// DELETE /projects/:id
///
/// Only the owner may delete; other callers get 404.
pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let identity = require_identity(&headers)?;

    let owned = state
        .gateway
        .get_project(&project_id)
        .await?
        .is_some_and(|p| p.user_id == identity.as_str());
    if !owned {
        return Err(ApiError::NotFound(format!("Project not found: {}", project_id)));
    }

    state.gateway.delete_project(&project_id).await?;
    tracing::info!(project_id = %project_id, user_id = %identity, "Project deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

/// Build project routes
pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects))
        .route("/projects/events", get(super::sse::project_list_stream))
        .route("/projects/:id", delete(delete_project))
}

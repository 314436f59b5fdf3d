//! Sheet session handlers
//!
//! Sessions live in memory. Image uploads return 202 with the optimistic
//! column id; the pipeline continues in the background and reports through
//! `/sessions/:id/events`.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{identity_from, require_identity};
use crate::{
    error::{ApiError, ApiResult},
    models::{ImageFile, SessionSnapshot},
    workflow::SheetSession,
    AppState,
};

/// POST /sessions/:id/images request
#[derive(Debug, Deserialize)]
pub struct AddImageRequest {
    pub file_name: String,
    /// Overrides the type guessed from the file name
    #[serde(default)]
    pub content_type: Option<String>,
    pub data_base64: String,
}

/// POST /sessions/:id/images response
#[derive(Debug, Serialize)]
pub struct AddImageResponse {
    pub session_id: Uuid,
    pub column_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TitleRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct FieldNameRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct AddFieldResponse {
    pub field_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CellRequest {
    pub column_id: String,
    pub field_id: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub project_id: String,
}

async fn find_session(state: &AppState, session_id: Uuid) -> ApiResult<SheetSession> {
    state
        .session(session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", session_id)))
}

/// POST /sessions
pub async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<SessionSnapshot>) {
    let session = state.create_session().await;
    (StatusCode::CREATED, Json(session.snapshot()))
}

/// GET /sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(find_session(&state, session_id).await?.snapshot()))
}

/// DELETE /sessions/:id
///
/// Releases the session's local images; in-flight pipelines finish without writing.
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let session = state
        .remove_session(session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", session_id)))?;
    session.reset();
    tracing::info!(session_id = %session_id, "Session closed");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /sessions/:id/images
///
/// Appends the column and returns 202; extraction runs in the background.
pub async fn add_image(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AddImageRequest>,
) -> ApiResult<(StatusCode, Json<AddImageResponse>)> {
    let session = find_session(&state, session_id).await?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(request.data_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("data_base64 is not valid base64: {}", e)))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Image is empty".to_string()));
    }

    let mut image = ImageFile::new(request.file_name, bytes);
    if let Some(content_type) = request.content_type {
        image = image.with_content_type(content_type);
    }

    let pending = session.add_image(image, identity_from(&headers));
    let column_id = pending.column_id().to_string();

    let state_clone = state.clone();
    let column_for_logging = column_id.clone();
    tokio::spawn(async move {
        if let Err(e) = pending.await {
            tracing::warn!(
                session_id = %session_id,
                column_id = %column_for_logging,
                error = %e,
                "Background image pipeline failed"
            );
            state_clone.record_error(e.to_string()).await;
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(AddImageResponse {
            session_id,
            column_id,
        }),
    ))
}

/// PUT /sessions/:id/title
pub async fn set_title(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<TitleRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = find_session(&state, session_id).await?;
    session.set_title(request.title);
    Ok(Json(session.snapshot()))
}

/// POST /sessions/:id/fields
pub async fn add_field(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<FieldNameRequest>,
) -> ApiResult<(StatusCode, Json<AddFieldResponse>)> {
    let session = find_session(&state, session_id).await?;
    let field_id = session.add_field(request.name);
    Ok((StatusCode::CREATED, Json(AddFieldResponse { field_id })))
}

/// PUT /sessions/:id/fields/:field_id
pub async fn rename_field(
    State(state): State<AppState>,
    Path((session_id, field_id)): Path<(Uuid, String)>,
    Json(request): Json<FieldNameRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = find_session(&state, session_id).await?;
    if !session.rename_field(&field_id, request.name) {
        return Err(ApiError::NotFound(format!("Field not found: {}", field_id)));
    }
    Ok(Json(session.snapshot()))
}

/// DELETE /sessions/:id/fields/:field_id
pub async fn remove_field(
    State(state): State<AppState>,
    Path((session_id, field_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = find_session(&state, session_id).await?;
    if !session.remove_field(&field_id) {
        return Err(ApiError::NotFound(format!("Field not found: {}", field_id)));
    }
    Ok(Json(session.snapshot()))
}

/// PUT /sessions/:id/cells
pub async fn set_cell(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<CellRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = find_session(&state, session_id).await?;
    if !session.set_cell_value(&request.column_id, &request.field_id, request.value) {
        return Err(ApiError::NotFound(format!(
            "Cell not found: column {} field {}",
            request.column_id, request.field_id
        )));
    }
    Ok(Json(session.snapshot()))
}

/// DELETE /sessions/:id/columns/:column_id
pub async fn delete_column(
    State(state): State<AppState>,
    Path((session_id, column_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = find_session(&state, session_id).await?;
    let identity = identity_from(&headers);
    session.delete_column(&column_id, identity.as_ref()).await?;
    Ok(Json(session.snapshot()))
}

/// POST /sessions/:id/reset
pub async fn reset(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = find_session(&state, session_id).await?;
    session.reset();
    Ok(Json(session.snapshot()))
}

/// POST /sessions/:id/save
pub async fn save(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<SaveResponse>> {
    let identity = require_identity(&headers)?;
    let session = find_session(&state, session_id).await?;
    let project_id = session.save_project(&identity).await?;
    Ok(Json(SaveResponse { project_id }))
}

/// POST /sessions/:id/load/:project_id
pub async fn load(
    State(state): State<AppState>,
    Path((session_id, project_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = find_session(&state, session_id).await?;
    let identity = identity_from(&headers);
    session.load_project(&project_id, identity.as_ref()).await?;
    Ok(Json(session.snapshot()))
}

/// POST /sessions/:id/template/:project_id
pub async fn from_template(
    State(state): State<AppState>,
    Path((session_id, project_id)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = find_session(&state, session_id).await?;
    let identity = identity_from(&headers);
    session
        .create_from_template(&project_id, identity.as_ref())
        .await?;
    Ok(Json(session.snapshot()))
}

/// GET /sessions/:id/export.csv
pub async fn export_csv(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let session = find_session(&state, session_id).await?;
    let csv = session
        .export_csv()
        .map_err(|e| ApiError::Internal(format!("CSV export failed: {}", e)))?;

    let disposition = format!(
        "attachment; filename=\"{}.csv\"",
        session.sheet().title.replace('"', "'")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    ))
}

/// Build session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(close_session))
        .route("/sessions/:id/images", post(add_image))
        .route("/sessions/:id/title", put(set_title))
        .route("/sessions/:id/fields", post(add_field))
        .route(
            "/sessions/:id/fields/:field_id",
            put(rename_field).delete(remove_field),
        )
        .route("/sessions/:id/cells", put(set_cell))
        .route("/sessions/:id/columns/:column_id", delete(delete_column))
        .route("/sessions/:id/reset", post(reset))
        .route("/sessions/:id/save", post(save))
        .route("/sessions/:id/load/:project_id", post(load))
        .route("/sessions/:id/template/:project_id", post(from_template))
        .route("/sessions/:id/export.csv", get(export_csv))
        .route("/sessions/:id/events", get(super::sse::session_event_stream))
}

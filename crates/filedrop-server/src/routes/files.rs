//! File reservation and deletion endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use filedrop_core::domain::newtypes::FileId;
use filedrop_core::usecases::ReserveRequest;

use crate::auth::{AuthedUser, ReqCtx};
use crate::error::ApiError;
use crate::state::AppState;

/// `POST /files` request body
#[derive(Debug, Deserialize)]
pub struct CreateFileBody {
    pub orig_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub auto_delete: bool,
}

/// `POST /files` response body
#[derive(Debug, Serialize)]
pub struct CreateFileResponse {
    pub id: FileId,
}

/// `POST /files` - reserve an upload slot
pub async fn create_file(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
    ctx: ReqCtx,
    Json(body): Json<CreateFileBody>,
) -> Result<(StatusCode, Json<CreateFileResponse>), ApiError> {
    let request = ReserveRequest {
        original_name: body.orig_name,
        content_type: body.content_type,
        size_bytes: body.size_bytes,
        expires_at: body.expires_at,
        password: body.password,
        auto_delete: body.auto_delete,
    };
    let file = state
        .reserve
        .execute(&user, request, &ctx.meta)
        .await
        .map_err(|e| ctx.err(e))?;
    Ok((StatusCode::CREATED, Json(CreateFileResponse { id: file.id() })))
}

/// `DELETE /user/files/:id` - owner or admin removal
pub async fn delete_file(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
    ctx: ReqCtx,
    Path(id): Path<FileId>,
) -> Result<StatusCode, ApiError> {
    state
        .delete
        .execute(&user, id, &ctx.meta)
        .await
        .map_err(|e| ctx.err(e))?;
    Ok(StatusCode::NO_CONTENT)
}

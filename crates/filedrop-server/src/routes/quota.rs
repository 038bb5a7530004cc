//! Quota read endpoint

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::auth::{AuthedUser, ReqCtx};
use crate::error::ApiError;
use crate::state::AppState;

/// `GET /quota` response body
#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub used_bytes: u64,
    /// Absent means unlimited
    pub limit_bytes: Option<u64>,
}

/// `GET /quota` - the caller's storage standing
pub async fn get_quota(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
    ctx: ReqCtx,
) -> Result<Json<QuotaResponse>, ApiError> {
    let standing = state.quota.execute(&user).await.map_err(|e| ctx.err(e))?;
    Ok(Json(QuotaResponse {
        used_bytes: standing.used_bytes,
        limit_bytes: standing.limit_bytes,
    }))
}

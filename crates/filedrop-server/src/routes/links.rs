//! Download-link issuance endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use filedrop_core::domain::newtypes::FileId;
use filedrop_core::usecases::IssueOptions;

use crate::auth::{AuthedUser, ReqCtx};
use crate::error::ApiError;
use crate::state::AppState;

/// `POST /links` request body
#[derive(Debug, Deserialize)]
pub struct CreateLinkBody {
    pub id: FileId,
    pub ttl_seconds: i64,
    /// Reject the link after its first successful download
    #[serde(default)]
    pub single_use: bool,
}

/// `POST /links` response body
#[derive(Debug, Serialize)]
pub struct CreateLinkResponse {
    pub url: String,
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// `POST /links` - issue a signed download link
pub async fn create_link(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
    ctx: ReqCtx,
    Json(body): Json<CreateLinkBody>,
) -> Result<(StatusCode, Json<CreateLinkResponse>), ApiError> {
    let options = IssueOptions {
        ttl: Duration::seconds(body.ttl_seconds),
        single_use: body.single_use,
    };
    let link = state
        .links
        .execute(&user, body.id, options, &ctx.meta)
        .await
        .map_err(|e| ctx.err(e))?;

    if link.single_use {
        state.nonces.arm(link.claims.nonce, link.claims.expires_at);
    }

    Ok((
        StatusCode::CREATED,
        Json(CreateLinkResponse {
            url: link.url,
            token: link.token,
            expires_at: link.claims.expires_at,
        }),
    ))
}

//! Token-gated download endpoint
//!
//! `GET /download?token=<token>` serves the payload; password-gated
//! files take `POST /download?token=<token>` with `{password}` in the
//! body. Headers come from the metadata row, never from the object
//! store; the original file name is sanitized before it reaches
//! `Content-Disposition`.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use filedrop_core::domain::CoreError;
use filedrop_core::usecases::{DownloadPayload, DownloadRequest};

use crate::auth::ReqCtx;
use crate::error::ApiError;
use crate::single_use::ConsumeOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadBody {
    pub password: Option<String>,
}

/// `GET /download?token=<token>` - passwordless downloads
pub async fn download_get(
    State(state): State<AppState>,
    ctx: ReqCtx,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    serve(state, ctx, query.token, None).await
}

/// `POST /download?token=<token>` - submit the password when required
pub async fn download_post(
    State(state): State<AppState>,
    ctx: ReqCtx,
    Query(query): Query<DownloadQuery>,
    Json(body): Json<DownloadBody>,
) -> Result<Response, ApiError> {
    serve(state, ctx, query.token, body.password).await
}

async fn serve(
    state: AppState,
    ctx: ReqCtx,
    token: String,
    password: Option<String>,
) -> Result<Response, ApiError> {
    let payload = state
        .download
        .execute(DownloadRequest { token, password }, &ctx.meta)
        .await
        .map_err(|e| ctx.err(e))?;

    // Single-use enforcement after full authorization: the first
    // successful request consumes the nonce, the second is refused.
    if state.nonces.consume(&payload.claims.nonce) == ConsumeOutcome::AlreadyConsumed {
        return Err(ctx.err(CoreError::LinkExpired));
    }

    // Stats update is fire-and-forget once the stream is open.
    let download = state.download.clone();
    let file_id = payload.file.id();
    tokio::spawn(async move {
        if let Err(e) = download.record_download(file_id).await {
            tracing::warn!(%file_id, error = %e, "download stats update failed");
        }
    });

    Ok(into_response(payload, &ctx)?)
}

fn into_response(payload: DownloadPayload, ctx: &ReqCtx) -> Result<Response, ApiError> {
    let content_type = payload
        .file
        .content_type()
        .parse::<HeaderValue>()
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_filename(payload.file.original_name())
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, payload.content_length)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&disposition)
                .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
        )
        .body(Body::from_stream(payload.body))
        .map_err(|e| ctx.err(CoreError::Internal(format!("response build: {e}"))))
}

/// Strips everything that could escape a quoted `filename=` parameter
///
/// Path separators and control characters become underscores; the name
/// is capped so a hostile reservation cannot inflate response headers.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' | '/' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(255)
        .collect();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_ordinary_names() {
        assert_eq!(sanitize_filename("report-2026.pdf"), "report-2026.pdf");
        assert_eq!(sanitize_filename("häßlich übung.txt"), "häßlich übung.txt");
    }

    #[test]
    fn test_sanitize_neutralizes_escapes() {
        assert_eq!(sanitize_filename("..\\..\\evil.exe"), ".._.._evil.exe");
        assert_eq!(sanitize_filename("a\"b.txt"), "a_b.txt");
        assert_eq!(sanitize_filename("new\nline"), "new_line");
        assert_eq!(sanitize_filename("/etc/passwd"), "_etc_passwd");
    }

    #[test]
    fn test_sanitize_empty_falls_back() {
        assert_eq!(sanitize_filename(""), "download");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "x".repeat(1000);
        assert_eq!(sanitize_filename(&long).len(), 255);
    }
}

//! Upload ingestion endpoints
//!
//! `POST /upload?id=<file_id>` streams a multipart `file` field into the
//! reserved object without ever buffering the body: the multipart field
//! is pumped into a small channel that the upload use case drains
//! concurrently, so backpressure reaches the client socket.
//!
//! The `/upload/sessions` family is the chunked/resumable variant over
//! the object store's multipart protocol.

use std::io;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use futures::SinkExt;
use serde::{Deserialize, Serialize};

use filedrop_core::domain::newtypes::{FileId, SessionId};
use filedrop_core::domain::{CoreError, SessionStatus};
use filedrop_core::ports::ByteStream;

use crate::auth::{AuthedUser, ReqCtx};
use crate::error::ApiError;
use crate::state::AppState;

/// Multipart field carrying the payload
const FILE_FIELD: &str = "file";

/// Channel depth between the multipart reader and the object writer;
/// small on purpose so backpressure propagates
const PUMP_DEPTH: usize = 4;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub id: FileId,
}

/// `POST /upload?id=<file_id>` - stream the body into the reservation
pub async fn upload_body(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
    ctx: ReqCtx,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    // Locate the payload field; anything before it is ignored.
    let mut field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(FILE_FIELD) => break field,
            Ok(Some(_)) => continue,
            Ok(None) => {
                return Err(ctx.err(CoreError::Validation(format!(
                    "multipart field {FILE_FIELD:?} is required"
                ))))
            }
            Err(e) => {
                return Err(ctx.err(CoreError::Validation(format!("malformed multipart: {e}"))))
            }
        }
    };

    // Pump the borrowed field through a channel so the use case can
    // consume an owned stream while we keep reading.
    let (mut tx, rx) = futures::channel::mpsc::channel::<Result<Bytes, io::Error>>(PUMP_DEPTH);
    let body: ByteStream = Box::pin(rx);

    let pump = async {
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    // The consumer hanging up means it already failed;
                    // stop reading, its error is the one that counts.
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx
                        .send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())))
                        .await;
                    break;
                }
            }
        }
        drop(tx);
    };

    let upload = state.upload.execute(&user, query.id, body, &ctx.meta);
    let ((), result) = tokio::join!(pump, upload);
    result.map_err(|e| ctx.err(e))?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Resumable sessions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenSessionBody {
    pub file_id: FileId,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub file_id: FileId,
    pub total_size: u64,
    pub current_size: u64,
    pub status: SessionStatus,
    /// Size every non-final chunk must have
    pub chunk_bytes: u64,
}

/// `POST /upload/sessions` - open a resumable session
pub async fn open_session(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
    ctx: ReqCtx,
    Json(body): Json<OpenSessionBody>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let session = state
        .resumable
        .open(&user, body.file_id, &ctx.meta)
        .await
        .map_err(|e| ctx.err(e))?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: session.id(),
            file_id: session.file_id(),
            total_size: session.total_size(),
            current_size: session.current_size(),
            status: session.status(),
            chunk_bytes: state.resumable.chunk_bytes(),
        }),
    ))
}

/// `PUT /upload/sessions/:id` - append one chunk
pub async fn append_chunk(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
    ctx: ReqCtx,
    Path(id): Path<SessionId>,
    chunk: Bytes,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .resumable
        .append(&user, id, chunk, &ctx.meta)
        .await
        .map_err(|e| ctx.err(e))?;
    Ok(Json(SessionResponse {
        session_id: session.id(),
        file_id: session.file_id(),
        total_size: session.total_size(),
        current_size: session.current_size(),
        status: session.status(),
        chunk_bytes: state.resumable.chunk_bytes(),
    }))
}

/// `POST /upload/sessions/:id/complete` - assemble and finalize
pub async fn complete_session(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
    ctx: ReqCtx,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .resumable
        .complete(&user, id, &ctx.meta)
        .await
        .map_err(|e| ctx.err(e))?;
    Ok(Json(SessionResponse {
        session_id: session.id(),
        file_id: session.file_id(),
        total_size: session.total_size(),
        current_size: session.current_size(),
        status: session.status(),
        chunk_bytes: state.resumable.chunk_bytes(),
    }))
}

/// `DELETE /upload/sessions/:id` - abort and fail the file
pub async fn abort_session(
    State(state): State<AppState>,
    AuthedUser(user): AuthedUser,
    ctx: ReqCtx,
    Path(id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    state
        .resumable
        .abort(&user, id, &ctx.meta)
        .await
        .map_err(|e| ctx.err(e))?;
    Ok(StatusCode::NO_CONTENT)
}

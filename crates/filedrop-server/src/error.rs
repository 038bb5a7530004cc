//! HTTP error mapping
//!
//! Every failure leaving a handler carries its stable machine-readable
//! code and the request's correlation id; internals are logged, never
//! surfaced. The mapping from [`ErrorKind`] to status code is part of
//! the API contract.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use filedrop_core::domain::newtypes::CorrelationId;
use filedrop_core::domain::{CoreError, ErrorKind};

/// A handler failure bound to its request correlation id
pub struct ApiError {
    pub error: CoreError,
    pub correlation_id: CorrelationId,
}

impl ApiError {
    pub fn new(error: CoreError, correlation_id: CorrelationId) -> Self {
        Self {
            error,
            correlation_id,
        }
    }
}

/// Status code for each stable kind
fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::QuotaExceeded => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::SizeExceeded => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::SizeMismatch => StatusCode::BAD_REQUEST,
        ErrorKind::DuplicateInWindow => StatusCode::CONFLICT,
        ErrorKind::TokenInvalid => StatusCode::FORBIDDEN,
        ErrorKind::LinkExpired => StatusCode::GONE,
        ErrorKind::NotReady => StatusCode::CONFLICT,
        ErrorKind::PasswordRequired => StatusCode::UNAUTHORIZED,
        ErrorKind::PasswordIncorrect => StatusCode::FORBIDDEN,
        ErrorKind::FileGone => StatusCode::GONE,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::IntegrityFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::MetadataUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.error.kind();
        let status = status_for(kind);

        // Clients get the stable code; internals stay in the logs.
        let message = match kind {
            ErrorKind::Internal
            | ErrorKind::StorageUnavailable
            | ErrorKind::MetadataUnavailable => {
                tracing::error!(
                    correlation_id = %self.correlation_id,
                    error = %self.error,
                    "request failed"
                );
                "the service is unable to complete the request".to_string()
            }
            _ => self.error.to_string(),
        };

        let body = Json(json!({
            "error": kind.code(),
            "message": message,
            "correlation_id": self.correlation_id.to_string(),
        }));

        let mut response = (status, body).into_response();
        if let CoreError::RateLimited { retry_after } = &self.error {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&self.correlation_id.to_string()) {
            response.headers_mut().insert("x-correlation-id", value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::QuotaExceeded), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(status_for(ErrorKind::LinkExpired), StatusCode::GONE);
        assert_eq!(status_for(ErrorKind::FileGone), StatusCode::GONE);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::DuplicateInWindow), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::MetadataUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let err = ApiError::new(
            CoreError::RateLimited {
                retry_after: std::time::Duration::from_secs(17),
            },
            CorrelationId::new(),
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "17"
        );
        assert!(response.headers().contains_key("x-correlation-id"));
    }
}

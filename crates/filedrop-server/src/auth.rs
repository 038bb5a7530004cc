//! Principal extraction and request context
//!
//! The session/authentication layer in front of this service (reverse
//! proxy + session service) authenticates the caller and injects the
//! principal id as `x-filedrop-user`; this module resolves it against
//! the users table. The header is trusted by deployment contract - the
//! edge strips any client-supplied value.
//!
//! The request context carries the correlation id (minted by middleware
//! for every request) and the client address, honoring
//! `x-forwarded-for` only when the proxy is trusted by configuration.

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use std::net::SocketAddr;

use filedrop_core::domain::newtypes::{CorrelationId, UserId};
use filedrop_core::domain::{CoreError, User};
use filedrop_core::usecases::RequestMeta;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the authenticated principal id
pub const PRINCIPAL_HEADER: &str = "x-filedrop-user";

/// Correlation id minted per request by [`correlation_middleware`]
///
/// [`correlation_middleware`]: crate::routes::correlation_middleware
#[derive(Debug, Clone, Copy)]
pub struct RequestCorrelation(pub CorrelationId);

/// Per-request context: correlation id plus best-effort client address
#[derive(Debug, Clone)]
pub struct ReqCtx {
    pub meta: RequestMeta,
}

impl ReqCtx {
    /// Wraps a core error with this request's correlation id
    pub fn err(&self, error: CoreError) -> ApiError {
        ApiError::new(error, self.meta.correlation_id)
    }
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for ReqCtx {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let correlation_id = parts
            .extensions
            .get::<RequestCorrelation>()
            .map(|c| c.0)
            .unwrap_or_default();
        let ip = client_ip(parts, state.trusted_proxy);
        Ok(Self {
            meta: RequestMeta { correlation_id, ip },
        })
    }
}

/// The authenticated principal, resolved to its minimal user view
///
/// Unknown principals are admitted with default settings (no quota
/// limit, not admin): account provisioning is owned by the session
/// layer, and its users must not bounce off the core.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub User);

#[async_trait::async_trait]
impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ctx = ReqCtx::from_request_parts(parts, state).await?;

        let header = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ctx.err(CoreError::Unauthenticated))?;
        let user_id: UserId = header
            .parse()
            .map_err(|_| ctx.err(CoreError::Unauthenticated))?;

        let user = match state.metadata.get_user(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                let user = User::new(user_id, None, false);
                state
                    .metadata
                    .upsert_user(&user)
                    .await
                    .map_err(|e| ctx.err(e))?;
                user
            }
            Err(e) => return Err(ctx.err(e)),
        };
        Ok(Self(user))
    }
}

/// Resolves the client address for rate limiting and audit entries
///
/// With a trusted proxy the first `x-forwarded-for` hop wins; otherwise
/// the socket peer address (when the server was started with connect
/// info) is used.
pub fn client_ip(parts: &Parts, trusted_proxy: bool) -> Option<String> {
    if trusted_proxy {
        if let Some(forwarded) = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return Some(first.to_string());
                }
            }
        }
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
}

//! HTTP routing and cross-cutting middleware
//!
//! Route groups carry their rate-limit class; the correlation middleware
//! mints an id for every request and echoes it in the response header so
//! clients can quote it when reporting failures.

pub mod download;
pub mod files;
pub mod health;
pub mod links;
pub mod quota;
pub mod upload;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use filedrop_core::domain::newtypes::CorrelationId;
use filedrop_core::domain::CoreError;

use crate::auth::{RequestCorrelation, PRINCIPAL_HEADER};
use crate::error::ApiError;
use crate::rate_limit::EndpointClass;
use crate::state::AppState;

/// Builds the full application router
pub fn build_router(state: AppState) -> Router {
    let upload_routes = Router::new()
        .route("/upload", post(upload::upload_body))
        .route("/upload/sessions", post(upload::open_session))
        .route("/upload/sessions/:id", put(upload::append_chunk))
        .route("/upload/sessions/:id/complete", post(upload::complete_session))
        .route("/upload/sessions/:id", delete(upload::abort_session))
        .route("/files", post(files::create_file))
        // Upload bodies and chunks are far beyond the default 2 MiB cap;
        // the pipeline enforces its own declared-size limiter.
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn_with_state(
            (state.clone(), EndpointClass::Upload),
            rate_limit_middleware,
        ));

    let download_routes = Router::new()
        .route("/download", get(download::download_get))
        .route("/download", post(download::download_post))
        .layer(middleware::from_fn_with_state(
            (state.clone(), EndpointClass::Download),
            rate_limit_middleware,
        ));

    let general_routes = Router::new()
        .route("/links", post(links::create_link))
        .route("/quota", get(quota::get_quota))
        .route("/user/files/:id", delete(files::delete_file))
        // Metadata-bound routes finish fast or not at all; payload
        // routes carry their own deadlines and stay unwrapped.
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(middleware::from_fn_with_state(
            (state.clone(), EndpointClass::Default),
            rate_limit_middleware,
        ));

    Router::new()
        .merge(upload_routes)
        .merge(download_routes)
        .merge(general_routes)
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .layer(middleware::from_fn(correlation_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Mints a correlation id per request and echoes it in the response
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = CorrelationId::new();
    request
        .extensions_mut()
        .insert(RequestCorrelation(correlation_id));

    let mut response = next.run(request).await;
    if !response.headers().contains_key("x-correlation-id") {
        if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
            response.headers_mut().insert("x-correlation-id", value);
        }
    }
    response
}

/// Rate-limit middleware for one endpoint class
async fn rate_limit_middleware(
    State((state, class)): State<(AppState, EndpointClass)>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let correlation_id = request
        .extensions()
        .get::<RequestCorrelation>()
        .map(|c| c.0)
        .unwrap_or_default();

    // Principal: the authenticated user when present, the client
    // address otherwise.
    let principal = request
        .headers()
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| client_ip_of(&request, state.trusted_proxy))
        .unwrap_or_else(|| "anonymous".to_string());

    if let Err(retry_after) = state.limiter.check(&principal, class) {
        tracing::debug!(class = class.name(), %principal, "rate limited");
        return Err(ApiError::new(
            CoreError::RateLimited { retry_after },
            correlation_id,
        ));
    }
    Ok(next.run(request).await)
}

fn client_ip_of(request: &Request, trusted_proxy: bool) -> Option<String> {
    if trusted_proxy {
        if let Some(forwarded) = request
            .headers()
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
    request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip().to_string())
}

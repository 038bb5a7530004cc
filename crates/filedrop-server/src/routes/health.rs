//! Liveness and readiness endpoints
//!
//! `/health` answers as long as the process serves requests. `/ready`
//! is the deep check: it pings both stores (short deadline each) and
//! reports breaker state, so a load balancer stops routing to a replica
//! whose dependencies are gone.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Deadline for each dependency probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub metadata: DependencyStatus,
    pub object_store: DependencyStatus,
}

#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub healthy: bool,
    pub circuit_open: bool,
}

/// `GET /health` - liveness
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// `GET /ready` - deep readiness
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let metadata_healthy = matches!(
        tokio::time::timeout(PROBE_TIMEOUT, state.metadata.ping()).await,
        Ok(Ok(()))
    );
    let objects_healthy = matches!(
        tokio::time::timeout(PROBE_TIMEOUT, state.objects.ping()).await,
        Ok(Ok(()))
    );

    let response = ReadyResponse {
        ready: metadata_healthy && objects_healthy,
        metadata: DependencyStatus {
            healthy: metadata_healthy,
            circuit_open: state.metadata_breaker.is_open(),
        },
        object_store: DependencyStatus {
            healthy: objects_healthy,
            circuit_open: state.object_breaker.is_open(),
        },
    };
    let status = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

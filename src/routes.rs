//! HTTP endpoints of the resource server.
//!
//! - `GET /mint` - paid; triggers one randomness request for the payer
//! - `GET /requests/{requestId}` - state of a randomness request
//! - `GET /health` - liveness

use alloy_primitives::U256;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use x402_axum::Paygate;
use x402_oracle::{OracleBridge, RandomnessCoordinator};
use x402_types::facilitator::Facilitator;
use x402_types::proto::ErrorResponse;

pub type MintGate<F, C> = Paygate<F, OracleBridge<C>>;

pub fn routes<F, C>(gate: MintGate<F, C>) -> Router
where
    F: Facilitator + Send + Sync + 'static,
    C: RandomnessCoordinator + Send + Sync + 'static,
{
    Router::new()
        .route("/mint", get(get_mint::<F, C>))
        .route("/requests/{request_id}", get(get_request::<F, C>))
        .route("/health", get(get_health))
        .with_state(gate)
}

#[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
pub async fn get_mint<F, C>(State(gate): State<MintGate<F, C>>, headers: HeaderMap) -> Response
where
    F: Facilitator + Send + Sync + 'static,
    C: RandomnessCoordinator + Send + Sync + 'static,
{
    gate.handle(&headers).await
}

pub async fn get_request<F, C>(
    State(gate): State<MintGate<F, C>>,
    Path(request_id): Path<String>,
) -> Response {
    let Ok(id) = U256::from_str_radix(&request_id, 10) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request_id", request_id);
    };
    match gate.action().status(&id) {
        Some(request) => (StatusCode::OK, Json(request)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "unknown_request", request_id),
    }
}

pub async fn get_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn error_response(status: StatusCode, error: &str, details: String) -> Response {
    let body = ErrorResponse {
        error: error.to_string(),
        details: Some(details),
    };
    (status, Json(body)).into_response()
}

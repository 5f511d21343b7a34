//! HTTP endpoints of an x402 facilitator.
//!
//! - `GET /verify`, `GET /settle` - machine-readable endpoint descriptions
//! - `POST /verify` - `{ payload, details }` to `{ isValid, invalidReason, payer? }`
//! - `POST /settle` - `{ payload, details }` to `{ success, error, txHash }`
//! - `GET /supported` - payment kinds and signer addresses
//! - `GET /health` - liveness
//!
//! A `payload` that is not a valid `X-PAYMENT` value is answered with 400.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use x402_types::facilitator::Facilitator;
use x402_types::proto::{ErrorResponse, SettleRequest, VerifyRequest};

use crate::facilitator_local::FacilitatorLocalError;

/// Facilitator routes, to be given an `Arc<F>` state.
pub fn routes<F>() -> Router<Arc<F>>
where
    F: Facilitator + Send + Sync + 'static,
    F::Error: IntoResponse,
{
    Router::new()
        .route("/verify", get(get_verify_info).post(post_verify::<F>))
        .route("/settle", get(get_settle_info).post(post_settle::<F>))
        .route("/supported", get(get_supported::<F>))
        .route("/health", get(get_health))
}

#[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
pub async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "payload": "base64 X-PAYMENT header value",
            "details": "PaymentTerms",
        }
    }))
}

#[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
pub async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "payload": "base64 X-PAYMENT header value",
            "details": "PaymentTerms",
        }
    }))
}

pub async fn get_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
pub async fn get_supported<F>(State(facilitator): State<Arc<F>>) -> Response
where
    F: Facilitator,
    F::Error: IntoResponse,
{
    match facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(supported)).into_response(),
        Err(error) => error.into_response(),
    }
}

#[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
pub async fn post_verify<F>(
    State(facilitator): State<Arc<F>>,
    Json(body): Json<VerifyRequest>,
) -> Response
where
    F: Facilitator,
    F::Error: IntoResponse,
{
    match facilitator.verify(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "Verification failed");
            error.into_response()
        }
    }
}

#[cfg_attr(feature = "telemetry", tracing::instrument(skip_all))]
pub async fn post_settle<F>(
    State(facilitator): State<Arc<F>>,
    Json(body): Json<SettleRequest>,
) -> Response
where
    F: Facilitator,
    F::Error: IntoResponse,
{
    match facilitator.settle(&body).await {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "Settlement failed");
            error.into_response()
        }
    }
}

impl IntoResponse for FacilitatorLocalError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            FacilitatorLocalError::Decoding(_) => (StatusCode::BAD_REQUEST, "invalid_payload"),
            FacilitatorLocalError::Ledger(_) => (StatusCode::BAD_GATEWAY, "ledger_unavailable"),
        };
        let body = ErrorResponse {
            error: error.to_string(),
            details: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

//! HTTP surface of the facilitator
//!
//! Every failure a client can cause is answered with 400 and a typed body. The
//! correlation headers are set on every verify and settle response, including
//! responses to bodies that could not be parsed.

use crate::facilitator::Facilitator;
use crate::receipt::{settle_headers, supported_headers, verify_headers};
use crate::types::{
    headers, ErrorReason, SettleRequest, SettleResponse, VerifyRequest, VerifyResponse,
    X402_VERSION,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Network and scheme reported when the request body could not be read
const UNKNOWN: &str = "unknown";

/// Build the facilitator router
pub fn router(facilitator: Arc<Facilitator>) -> Router {
    Router::new()
        .route("/verify", post(verify_handler).get(verify_info))
        .route("/settle", post(settle_handler).get(settle_info))
        .route("/supported", get(supported_handler))
        .route("/health", get(health_handler))
        .with_state(facilitator)
}

fn request_id(request_headers: &HeaderMap) -> String {
    request_headers
        .get(headers::REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn status(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// Handle payment verification requests
async fn verify_handler(
    State(facilitator): State<Arc<Facilitator>>,
    request_headers: HeaderMap,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id(&request_headers);
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(request_id = %request_id, error = %rejection, "Malformed verify request");
            let response = VerifyResponse::invalid(None, ErrorReason::InvalidPayload);
            let headers = verify_headers(&request_id, UNKNOWN, UNKNOWN, &response);
            return (StatusCode::BAD_REQUEST, headers, Json(response)).into_response();
        }
    };

    let response = facilitator.verify(&request).await;
    tracing::debug!(request_id = %request_id, valid = response.is_valid, "Verify handled");
    let headers = verify_headers(
        &request_id,
        &request.payment_payload.network,
        &request.payment_payload.scheme,
        &response,
    );
    (status(response.is_valid), headers, Json(response)).into_response()
}

/// Handle payment settlement requests
async fn settle_handler(
    State(facilitator): State<Arc<Facilitator>>,
    request_headers: HeaderMap,
    body: Result<Json<SettleRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id(&request_headers);
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(request_id = %request_id, error = %rejection, "Malformed settle request");
            let response = SettleResponse::failed(UNKNOWN, None, ErrorReason::InvalidPayload);
            let headers = settle_headers(&request_id, UNKNOWN, UNKNOWN, &response);
            return (StatusCode::BAD_REQUEST, headers, Json(response)).into_response();
        }
    };

    let body = facilitator.settle_with_receipt(&request_id, &request).await;
    tracing::debug!(request_id = %request_id, success = body.settlement.success, "Settle handled");
    let headers = settle_headers(
        &request_id,
        &request.payment_payload.network,
        &request.payment_payload.scheme,
        &body.settlement,
    );
    (status(body.settlement.success), headers, Json(body)).into_response()
}

/// Handle supported payment schemes requests
async fn supported_handler(State(facilitator): State<Arc<Facilitator>>) -> Response {
    let supported = facilitator.supported();
    let headers = supported_headers(&supported);
    (headers, Json(supported)).into_response()
}

async fn verify_info() -> Json<Value> {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "x402Version": X402_VERSION,
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        },
    }))
}

async fn settle_info() -> Json<Value> {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "x402Version": X402_VERSION,
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        },
    }))
}

/// Health check endpoint
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "x402Version": X402_VERSION,
    }))
}

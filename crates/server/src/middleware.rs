//! HTTP middleware adapters.
//!
//! The business logic (credential validation, metrics) lives in `gavel-core`;
//! this module adapts it to axum: header extraction, 401 conversion, the
//! terminal response-tracking event, and request-id propagation.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use gavel_core::auth::{AuthError, Authenticator, Credential};
use gavel_core::metrics::MetricsCollector;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer,
};
use tracing::warn;

/// Shared state for [`authenticate`].
#[derive(Clone)]
pub struct AuthState {
    pub authenticator: Arc<Authenticator>,
    pub metrics: Arc<MetricsCollector>,
}

/// Pulls a credential out of the request headers.
///
/// `X-API-Key` wins over `Authorization: Bearer` when both are present.
fn extract_credential(headers: &HeaderMap) -> Option<Credential> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(Credential::ApiKey(key.to_string()));
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| Credential::Bearer(token.to_string()))
}

fn unauthorized(error: &AuthError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": error.to_string(), "kind": "unauthenticated" })),
    )
        .into_response()
}

/// Axum middleware validating the request credential.
///
/// On success the [`gavel_core::auth::Identity`] is stored in request
/// extensions for downstream handlers. On failure the request is answered
/// with 401 before it can reach the engine, the cache, or the model.
pub async fn authenticate(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(credential) = extract_credential(request.headers()) else {
        let error = AuthError::MissingCredentials;
        state.metrics.record_auth_failure(&error);
        return unauthorized(&error);
    };

    match state.authenticator.authenticate(&credential, Utc::now()) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(error) => {
            warn!(reason = error.as_metric_str(), "authentication failed");
            state.metrics.record_auth_failure(&error);
            unauthorized(&error)
        }
    }
}

/// Axum middleware emitting exactly one `response_sent` event per request,
/// with the final status code and the observed latency.
pub async fn track_responses(
    State(metrics): State<Arc<MetricsCollector>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    metrics.record_response(response.status().as_u16(), latency_ms);
    response
}

/// Request-id layers for correlating log lines across a request.
#[must_use]
pub fn create_request_id_layers(
) -> (SetRequestIdLayer<MakeRequestUuid>, PropagateRequestIdLayer) {
    (
        SetRequestIdLayer::x_request_id(MakeRequestUuid),
        PropagateRequestIdLayer::x_request_id(),
    )
}

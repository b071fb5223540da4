//! Request handlers.
//!
//! Error responses are always `{"error": <message>, "kind": <taxonomy>}`:
//! 400 `invalid_feature_record`, 401 `unauthenticated` (from the auth
//! middleware), 502 `model_failure`/`cancelled`, 504 `timeout`, 500
//! `unexpected`. Successful predictions carry the price and an
//! `x-cache-status` header (`HIT`, `MISS`, or `SHARED` for requests that
//! joined another request's in-flight computation).

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use gavel_core::cache::CacheStatus;
use gavel_core::engine::{EngineError, PredictionEngine};
use gavel_core::features::FeatureRecord;
use gavel_core::inference::InferenceError;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

type PredictResponse = (StatusCode, [(&'static str, String); 1], Json<Value>);

fn error_body(status: StatusCode, message: &str, kind: &str) -> PredictResponse {
    (
        status,
        [("x-cache-status", "MISS".to_string())],
        Json(json!({ "error": message, "kind": kind })),
    )
}

fn engine_error_response(error: &EngineError) -> PredictResponse {
    let status = match error {
        EngineError::InvalidFeatures(_) => StatusCode::BAD_REQUEST,
        EngineError::Inference(InferenceError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Inference(_) => StatusCode::BAD_GATEWAY,
    };
    error_body(status, &error.to_string(), error.kind())
}

/// Handles `POST /predict`.
///
/// The body is parsed from `Value` by hand so malformed records produce the
/// documented 400 body instead of a framework rejection.
pub async fn handle_predict(
    State(engine): State<Arc<PredictionEngine>>,
    Json(payload): Json<Value>,
) -> PredictResponse {
    let record: FeatureRecord = match serde_json::from_value(payload) {
        Ok(record) => record,
        Err(e) => {
            return error_body(
                StatusCode::BAD_REQUEST,
                &format!("invalid feature record: {e}"),
                "invalid_feature_record",
            );
        }
    };

    match engine.predict(record).await {
        Ok(quote) => (
            StatusCode::OK,
            [("x-cache-status", quote.cache_status.as_header_str().to_string())],
            Json(json!({ "price": quote.price })),
        ),
        Err(error) => engine_error_response(&error),
    }
}

/// Processes one batch item; infallible so one bad record cannot fail the
/// whole batch.
async fn process_batch_item(engine: Arc<PredictionEngine>, item: Value) -> (Value, bool) {
    let record: FeatureRecord = match serde_json::from_value(item) {
        Ok(record) => record,
        Err(e) => {
            return (
                json!({
                    "error": format!("invalid feature record: {e}"),
                    "kind": "invalid_feature_record",
                }),
                false,
            );
        }
    };

    match engine.predict(record).await {
        Ok(quote) => {
            (json!({ "price": quote.price }), quote.cache_status == CacheStatus::Hit)
        }
        Err(error) => {
            (json!({ "error": error.to_string(), "kind": error.kind() }), false)
        }
    }
}

/// Handles `POST /predict/batch`.
///
/// Items are priced concurrently and results are returned in input order.
/// The batch itself answers 200; per-item failures appear as error objects
/// in the result array.
pub async fn handle_batch(
    State(engine): State<Arc<PredictionEngine>>,
    Json(payload): Json<Value>,
) -> PredictResponse {
    let Value::Array(items) = payload else {
        return error_body(
            StatusCode::BAD_REQUEST,
            "expected an array of feature records",
            "invalid_feature_record",
        );
    };

    info!(batch_size = items.len(), "received batch prediction request");

    let futures: Vec<_> = items
        .into_iter()
        .map(|item| process_batch_item(Arc::clone(&engine), item))
        .collect();
    let results = futures::future::join_all(futures).await;

    let mut responses = Vec::with_capacity(results.len());
    let mut any_hit = false;
    for (value, was_hit) in results {
        responses.push(value);
        any_hit = any_hit || was_hit;
    }

    let cache_status = if any_hit { "PARTIAL" } else { "MISS" };
    (
        StatusCode::OK,
        [("x-cache-status", cache_status.to_string())],
        Json(Value::Array(responses)),
    )
}

/// Handles `GET /metrics` in the Prometheus text exposition format.
pub async fn handle_metrics(
    State(engine): State<Arc<PredictionEngine>>,
) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        engine.metrics().get_prometheus_metrics(),
    )
}

/// Handles `GET /health`: liveness plus a service summary.
pub async fn handle_health(
    State(engine): State<Arc<PredictionEngine>>,
) -> impl IntoResponse {
    let summary = engine.metrics().get_summary().await;

    let health = json!({
        "status": "healthy",
        "cache": {
            "entries": engine.cache().len(),
            "hit_rate": summary.cache_hit_rate,
        },
        "requests": {
            "total": summary.requests_total,
            "auth_failures": summary.auth_failures_total,
            "inference_errors": summary.inference_errors_total,
            "average_latency_ms": summary.average_response_latency_ms,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (StatusCode::OK, Json(health))
}

/// Handles `GET /ready`: readiness with per-dependency checks.
pub async fn handle_ready(
    State(engine): State<Arc<PredictionEngine>>,
) -> impl IntoResponse {
    // The baseline model is compiled in and the cache needs no connection,
    // so readiness only fails once an external model backend is wired in.
    let checks = json!({
        "model": true,
        "cache": true,
    });

    let ready = json!({
        "status": "ready",
        "checks": checks,
        "model_version": engine.model_version(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (StatusCode::OK, Json(ready))
}

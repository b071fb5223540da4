//! Model invocation.
//!
//! The model itself is opaque behind [`PricePredictor`]; the pipeline only
//! assumes it is deterministic and side-effect-free for a given record, which
//! is the precondition that makes caching its output valid. The
//! [`InferenceInvoker`] wraps every call with a bounded timeout and translates
//! whatever the predictor raises into the [`InferenceError`] taxonomy, so raw
//! model errors never reach a caller.

pub mod baseline;

use crate::features::FeatureRecord;
use crate::metrics::MetricsCollector;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Opaque error type raised by predictor implementations.
pub type PredictorError = Box<dyn std::error::Error + Send + Sync>;

/// The opaque prediction function.
///
/// Implementations must be deterministic and side-effect-free for a given
/// record; violating that silently breaks cache semantics.
#[async_trait]
pub trait PricePredictor: Send + Sync {
    /// Predicts a sale price for the given (already validated) record.
    async fn predict(&self, record: &FeatureRecord) -> Result<f64, PredictorError>;

    /// Short model identifier for logs and the readiness endpoint.
    fn version(&self) -> &str;
}

/// Failures surfaced by [`InferenceInvoker::invoke`]. Cloneable so a single
/// failed fill can be fanned out to every waiter of that cache key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// The model did not answer within the configured budget.
    #[error("prediction timed out after {0}ms")]
    Timeout(u64),

    /// The model answered with an error or a non-finite value.
    #[error("model failure: {0}")]
    ModelFailure(String),

    /// The computing request was dropped before producing an outcome.
    #[error("prediction was cancelled")]
    Cancelled,
}

impl InferenceError {
    /// Stable snake_case token for metrics labels.
    #[must_use]
    pub fn as_metric_str(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::ModelFailure(_) => "model_failure",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Timeout and error-translation wrapper around the configured predictor.
pub struct InferenceInvoker {
    predictor: Arc<dyn PricePredictor>,
    timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl InferenceInvoker {
    #[must_use]
    pub fn new(
        predictor: Arc<dyn PricePredictor>,
        timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { predictor, timeout, metrics }
    }

    /// Identifier of the wrapped model.
    #[must_use]
    pub fn model_version(&self) -> &str {
        self.predictor.version()
    }

    /// Runs the model under the configured timeout.
    ///
    /// # Errors
    ///
    /// - [`InferenceError::Timeout`] when the budget elapses; the underlying
    ///   future is dropped at that point.
    /// - [`InferenceError::ModelFailure`] for any predictor error and for
    ///   NaN/infinite predictions.
    pub async fn invoke(&self, record: &FeatureRecord) -> Result<f64, InferenceError> {
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.predictor.predict(record)).await;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match outcome {
            Ok(Ok(price)) if price.is_finite() => Ok(price),
            Ok(Ok(price)) => {
                Err(InferenceError::ModelFailure(format!("non-finite prediction: {price}")))
            }
            Ok(Err(error)) => Err(InferenceError::ModelFailure(error.to_string())),
            Err(_) => Err(InferenceError::Timeout(
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };

        match &result {
            Ok(_) => self.metrics.record_inference_latency(latency_ms),
            Err(error) => {
                warn!(error = %error, latency_ms, "inference failed");
                self.metrics.record_inference_error(error);
            }
        }

        result
    }
}

//! Request orchestration.
//!
//! [`PredictionEngine`] drives one request through the pipeline: validate the
//! record, encode its cache key, consult the cache under single-flight
//! coordination, and account for the outcome. Authentication has already
//! happened at the HTTP layer by the time a record reaches the engine, and
//! the terminal response accounting happens in the HTTP layer's tracking
//! middleware, so the engine sees only the `validate → encode → resolve`
//! middle of the request state machine.

use crate::cache::{CacheStatus, PriceCache};
use crate::features::key::CacheKey;
use crate::features::{FeatureError, FeatureRecord};
use crate::inference::{InferenceError, InferenceInvoker};
use crate::metrics::MetricsCollector;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by [`PredictionEngine::predict`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// The record failed domain validation; it was rejected before key
    /// encoding and never reached the cache or the model.
    #[error("invalid feature record: {0}")]
    InvalidFeatures(#[from] FeatureError),

    /// The computation failed (or an in-flight computation this request
    /// joined failed).
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl EngineError {
    /// Taxonomy token used in error response bodies and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidFeatures(_) => "invalid_feature_record",
            Self::Inference(error) => error.as_metric_str(),
        }
    }
}

/// A priced request, with how the price was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub price: f64,
    pub cache_status: CacheStatus,
}

/// Composes validation, key encoding, the cache, and the model invoker.
pub struct PredictionEngine {
    cache: Arc<PriceCache>,
    invoker: Arc<InferenceInvoker>,
    metrics: Arc<MetricsCollector>,
}

impl PredictionEngine {
    #[must_use]
    pub fn new(
        cache: Arc<PriceCache>,
        invoker: Arc<InferenceInvoker>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { cache, invoker, metrics }
    }

    /// Resolves one feature record to a price quote.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidFeatures`] for out-of-domain records, and
    /// [`EngineError::Inference`] when the model invocation (own or joined)
    /// fails. All failures are recorded in metrics before returning.
    pub async fn predict(&self, record: FeatureRecord) -> Result<PriceQuote, EngineError> {
        self.metrics.record_request_received();

        if let Err(error) = record.validate() {
            self.metrics.record_invalid_record(&error);
            return Err(error.into());
        }

        let key = CacheKey::from_record(&record);
        let invoker = Arc::clone(&self.invoker);
        let outcome = self
            .cache
            .get_or_compute(&key, move || async move { invoker.invoke(&record).await })
            .await;

        match outcome {
            Ok((price, cache_status)) => {
                match cache_status {
                    CacheStatus::Hit => self.metrics.record_cache_hit(),
                    CacheStatus::Miss => self.metrics.record_cache_miss(),
                    CacheStatus::Joined => {
                        self.metrics.record_cache_miss();
                        self.metrics.record_fill_deduplication();
                    }
                }
                self.metrics.record_cache_entries(self.cache.len());
                debug!(key = %key, %cache_status, price, "prediction resolved");
                Ok(PriceQuote { price, cache_status })
            }
            Err(error) => {
                // Invoker failures are already counted at the invocation
                // site; a cancellation never reached the invoker.
                if error == InferenceError::Cancelled {
                    self.metrics.record_inference_error(&error);
                }
                Err(error.into())
            }
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    /// Identifier of the model behind the invoker.
    #[must_use]
    pub fn model_version(&self) -> &str {
        self.invoker.model_version()
    }
}

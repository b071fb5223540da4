//! Service metrics.
//!
//! Dual-path recording, sized for a hot request path:
//!
//! - Prometheus counters/histograms via the `metrics` facade are recorded on
//!   every event. These are lock-free atomic operations.
//! - An internal [`ServiceMetrics`] summary backs the `/health` endpoint. It
//!   is updated opportunistically with `try_write` so a contended lock skips
//!   the update instead of blocking the request.
//!
//! Recording never returns an error into the request path; a failed recorder
//! install falls back to a local recorder and logs the problem.

use crate::auth::AuthError;
use crate::features::FeatureError;
use crate::inference::InferenceError;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "failed to install Prometheus recorder, using local fallback"
                );
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Internal aggregate counters for the health/summary view.
///
/// May lag slightly behind the Prometheus series under contention; the
/// Prometheus side is authoritative for scraping.
#[derive(Debug, Clone, Default)]
pub struct ServiceMetrics {
    pub requests_total: u64,
    pub cache_hits_total: u64,
    pub cache_misses_total: u64,
    pub auth_failures_total: u64,
    pub invalid_records_total: u64,
    pub inference_errors_total: u64,
    pub responses_by_status: HashMap<u16, u64>,
    latency_sum_ms: u64,
    latency_count: u64,
}

impl ServiceMetrics {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_response_latency_ms(&self) -> f64 {
        if self.latency_count == 0 {
            0.0
        } else {
            self.latency_sum_ms as f64 / self.latency_count as f64
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits_total + self.cache_misses_total;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits_total as f64 / lookups as f64
        }
    }
}

/// Point-in-time summary exposed on the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub requests_total: u64,
    pub cache_hits_total: u64,
    pub cache_misses_total: u64,
    pub cache_hit_rate: f64,
    pub auth_failures_total: u64,
    pub inference_errors_total: u64,
    pub average_response_latency_ms: f64,
}

/// Records pipeline events as Prometheus series plus the internal summary.
pub struct MetricsCollector {
    metrics: Arc<RwLock<ServiceMetrics>>,
    prometheus_handle: PrometheusHandle,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(ServiceMetrics::default())),
            prometheus_handle: init_prometheus_recorder(),
        }
    }

    /// A request entered the pipeline.
    pub fn record_request_received(&self) {
        counter!("predict_requests_total").increment(1);
        if let Ok(mut m) = self.metrics.try_write() {
            m.requests_total += 1;
        }
    }

    /// A credential failed validation.
    pub fn record_auth_failure(&self, error: &AuthError) {
        counter!("predict_auth_failures_total", "reason" => error.as_metric_str()).increment(1);
        if let Ok(mut m) = self.metrics.try_write() {
            m.auth_failures_total += 1;
        }
    }

    /// A feature record failed domain validation.
    pub fn record_invalid_record(&self, error: &FeatureError) {
        counter!("predict_invalid_records_total", "reason" => error.as_metric_str()).increment(1);
        if let Ok(mut m) = self.metrics.try_write() {
            m.invalid_records_total += 1;
        }
    }

    pub fn record_cache_hit(&self) {
        counter!("predict_cache_hits_total").increment(1);
        if let Ok(mut m) = self.metrics.try_write() {
            m.cache_hits_total += 1;
        }
    }

    pub fn record_cache_miss(&self) {
        counter!("predict_cache_misses_total").increment(1);
        if let Ok(mut m) = self.metrics.try_write() {
            m.cache_misses_total += 1;
        }
    }

    /// A request joined an in-flight fill instead of starting its own.
    pub fn record_fill_deduplication(&self) {
        counter!("predict_fill_deduplications_total").increment(1);
    }

    /// Current number of live cache entries.
    pub fn record_cache_entries(&self, entries: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("predict_cache_entries").set(entries as f64);
    }

    /// One completed model invocation.
    pub fn record_inference_latency(&self, latency_ms: u64) {
        #[allow(clippy::cast_precision_loss)]
        histogram!("predict_inference_duration_seconds").record(latency_ms as f64 / 1000.0);
    }

    /// One failed model invocation, by failure kind.
    pub fn record_inference_error(&self, error: &InferenceError) {
        counter!("predict_inference_errors_total", "kind" => error.as_metric_str()).increment(1);
        if let Ok(mut m) = self.metrics.try_write() {
            m.inference_errors_total += 1;
        }
    }

    /// Terminal event: exactly one per request, from the response middleware.
    pub fn record_response(&self, status: u16, latency_ms: u64) {
        counter!("http_responses_total", "status" => status.to_string()).increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!("http_response_duration_seconds").record(latency_ms as f64 / 1000.0);

        if let Ok(mut m) = self.metrics.try_write() {
            *m.responses_by_status.entry(status).or_insert(0) += 1;
            m.latency_sum_ms += latency_ms;
            m.latency_count += 1;
        }
    }

    /// Renders all series in the Prometheus text exposition format.
    #[must_use]
    pub fn get_prometheus_metrics(&self) -> String {
        self.prometheus_handle.render()
    }

    /// Snapshot of the internal summary.
    pub async fn get_summary(&self) -> MetricsSummary {
        let m = self.metrics.read().await;
        MetricsSummary {
            requests_total: m.requests_total,
            cache_hits_total: m.cache_hits_total,
            cache_misses_total: m.cache_misses_total,
            cache_hit_rate: m.cache_hit_rate(),
            auth_failures_total: m.auth_failures_total,
            inference_errors_total: m.inference_errors_total,
            average_response_latency_ms: m.average_response_latency_ms(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

use anyhow::Result;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    serve, Router,
};
use gavel_core::{
    auth::{ApiKeySet, Authenticator, TokenVerifier},
    cache::{PriceCache, SystemClock},
    config::AppConfig,
    engine::PredictionEngine,
    inference::{baseline::BaselinePricer, InferenceInvoker},
    metrics::MetricsCollector,
};
use std::{num::NonZeroUsize, sync::Arc};
use tokio::{signal, sync::broadcast};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod middleware;
mod router;

/// Initializes the logging system based on the configuration.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,gavel_core={level},gavel_server={level}",
            level = config.logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

/// Container for initialized core services.
struct CoreServices {
    engine: Arc<PredictionEngine>,
    metrics: Arc<MetricsCollector>,
    cache: Arc<PriceCache>,
    authenticator: Arc<Authenticator>,
}

/// Initializes metrics, cache, model invoker, engine, and authenticator.
fn init_core_services(config: &AppConfig) -> Result<CoreServices> {
    let metrics = Arc::new(MetricsCollector::new());

    let capacity = NonZeroUsize::new(config.cache.capacity)
        .ok_or_else(|| anyhow::anyhow!("Cache capacity must be greater than 0"))?;
    let cache = Arc::new(PriceCache::new(config.cache_ttl(), capacity, Arc::new(SystemClock)));

    let predictor = Arc::new(BaselinePricer::new(config.model.version.clone()));
    let invoker = Arc::new(InferenceInvoker::new(
        predictor,
        config.inference_timeout(),
        Arc::clone(&metrics),
    ));

    let engine =
        Arc::new(PredictionEngine::new(Arc::clone(&cache), invoker, Arc::clone(&metrics)));

    let tokens = if config.auth.token_secret.is_empty() {
        None
    } else {
        Some(TokenVerifier::new(&config.auth.token_secret))
    };
    let authenticator =
        Arc::new(Authenticator::new(ApiKeySet::new(config.auth.api_keys.clone()), tokens));

    Ok(CoreServices { engine, metrics, cache, authenticator })
}

/// Assembles the router: public endpoints, authenticated prediction
/// endpoints, and the middleware stack.
fn create_app(services: &CoreServices, config: &AppConfig) -> Router {
    let (set_request_id, propagate_request_id) = middleware::create_request_id_layers();

    let mut public = Router::new()
        .route("/health", get(router::handle_health))
        .route("/ready", get(router::handle_ready));
    if config.metrics.enabled {
        public = public.route("/metrics", get(router::handle_metrics));
    }
    let public = public.with_state(Arc::clone(&services.engine));

    let mut api = Router::new()
        .route("/predict", post(router::handle_predict))
        .route("/predict/batch", post(router::handle_batch))
        .with_state(Arc::clone(&services.engine));

    if config.auth.enabled {
        let auth_state = middleware::AuthState {
            authenticator: Arc::clone(&services.authenticator),
            metrics: Arc::clone(&services.metrics),
        };
        api = api
            .layer(axum_middleware::from_fn_with_state(auth_state, middleware::authenticate));
    }

    api = api.layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests));
    api = api.layer(RequestBodyLimitLayer::new(config.server.max_body_bytes));
    api = api.layer(CompressionLayer::new());

    // Outermost on the API routes so 401s from the auth layer are counted
    // too: exactly one response event per request.
    api = api.layer(axum_middleware::from_fn_with_state(
        Arc::clone(&services.metrics),
        middleware::track_responses,
    ));

    // Layers apply in reverse order, so propagate runs after set.
    api = api.layer(propagate_request_id).layer(set_request_id);

    public.merge(api)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config =
        AppConfig::load().map_err(|e| anyhow::anyhow!("Configuration loading failed: {e}"))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    init_logging(&config);
    info!("Starting Gavel prediction server");
    debug!(
        auth_enabled = config.auth.enabled,
        bind_port = config.server.bind_port,
        cache_ttl_seconds = config.cache.ttl_seconds,
        cache_capacity = config.cache.capacity,
        "Configuration loaded"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let services = init_core_services(&config)?;
    let sweep_handle = services.cache.start_expiry_sweep(
        config.cache_sweep_interval(),
        Arc::clone(&services.metrics),
        shutdown_tx.subscribe(),
    );

    let app = create_app(&services, &config);
    let addr = config.socket_addr().map_err(|e| anyhow::anyhow!(e))?;
    info!(
        address = %addr,
        model_version = services.engine.model_version(),
        "Prediction server listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Err(e) = serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "Server error occurred");
    }

    let _ = shutdown_tx.send(());
    sweep_handle.abort();
    info!("Server shutdown complete");

    Ok(())
}

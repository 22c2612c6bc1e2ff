pub mod access_log;
pub mod config;
pub mod correlation;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod rate_limit;
pub mod routes;
pub mod timeout;

use crate::access_log::access_log_middleware;
use crate::config::{GatewayConfig, LogFormat};
use crate::correlation::correlation_id_middleware;
use crate::db::DocumentStore;
use crate::error::{GatewayError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::rate_limit::{IdentifierResolver, LimiterStore, RateLimitMiddleware};
use crate::routes::AppState;
use crate::timeout::{timeout_middleware, RequestTimeout};
use axum::{extract::DefaultBodyLimit, middleware, routing::get, Router};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Assemble the application: routes, admission on the protected prefix, and
/// the request pipeline.
///
/// Layer order, outermost first: timeout, correlation ID, access log.
pub fn build_app(
    config: &GatewayConfig,
    store: Arc<dyn DocumentStore>,
    limiter: Arc<LimiterStore>,
    metrics: Option<MetricsService>,
) -> Router {
    let resolver = IdentifierResolver::from_config(&config.rate_limit)
        .with_body_limit(config.server.body_limit_bytes);
    let admission = RateLimitMiddleware::new(limiter, resolver);

    let mut app = routes::router(
        AppState::new(store),
        admission,
        &config.rate_limit.protected_prefix,
    );

    if let Some(service) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(service),
        );
    }

    app.layer(DefaultBodyLimit::max(config.server.body_limit_bytes))
        .layer(middleware::from_fn(access_log_middleware))
        .layer(middleware::from_fn(correlation_id_middleware))
        .layer(middleware::from_fn_with_state(
            RequestTimeout(config.server.request_timeout()),
            timeout_middleware,
        ))
}

/// Run the service until SIGINT/SIGTERM.
///
/// The document store is connected before the listener binds and closed
/// after in-flight requests drain. If draining outlasts the configured grace
/// period the server is abandoned and an error returned.
pub async fn run(config: GatewayConfig) -> Result<()> {
    config.validate()?;

    info!("Starting nUDM service");
    info!(database = ?config.database, "Using document store");

    let metrics = if config.metrics.enabled {
        Some(MetricsService::new()?)
    } else {
        None
    };

    let store = db::store_from_config(&config.database)?;
    if let Err(e) = store.connect().await {
        error!(error = %e, backend = store.backend(), "Failed to connect to document store");
        return Err(e);
    }
    info!(backend = store.backend(), "Document store connected");

    let limiter = Arc::new(LimiterStore::new(config.rate_limit.clone()));
    let sweeper = limiter
        .clone()
        .spawn_sweeper(config.rate_limit.cleanup_interval());
    info!(
        prefix = %config.rate_limit.protected_prefix,
        requests = config.rate_limit.requests,
        window_secs = config.rate_limit.window_secs,
        "Rate limiting enabled for authentication endpoints"
    );

    let app = build_app(&config, store.clone(), limiter, metrics);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "nUDM service listening");

    let (stop_tx, stop_rx) = watch::channel(false);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    })
    .into_future();

    let forced = tokio::select! {
        result = server => {
            result.map_err(|e| GatewayError::Internal(format!("Server error: {}", e)))?;
            false
        }
        _ = drain_deadline(stop_rx, config.server.shutdown_grace()) => true,
    };

    if forced {
        error!("Forced shutdown after timeout");
    } else {
        info!("HTTP server closed");
    }

    sweeper.shutdown().await;
    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close document store");
    }
    info!("Document store connection closed");

    if forced {
        return Err(GatewayError::Internal(
            "Forced shutdown after timeout".to_string(),
        ));
    }
    Ok(())
}

/// Resolves `grace` after shutdown has been requested; never otherwise
async fn drain_deadline(mut stop: watch::Receiver<bool>, grace: Duration) {
    if stop.wait_for(|stopping| *stopping).await.is_err() {
        return std::future::pending().await;
    }
    tokio::time::sleep(grace).await;
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully"),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}

/// Initialize tracing/logging
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "nudm_gateway=debug".into());

    match format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .init(),
    }
}

use anyhow::Result;
use axum::{routing::get, Router};
use pmp_proxy_gateway::config::{Config, ConfigHotReload};
use pmp_proxy_gateway::health::ping;
use pmp_proxy_gateway::middleware::{
    create_logging_middleware, init_metrics, metrics_handler, request_id_middleware,
};
use pmp_proxy_gateway::routes::{register_all, RouteSurfaces, Services};
use pmp_proxy_gateway::tracer::shutdown_tracing;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::RecvError, watch};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pmp_proxy_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting PMP proxy gateway");

    init_metrics()?;
    info!("Initialized Prometheus metrics exporter");

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    info!("Loading configuration from: {}", config_path);

    let config = Config::from_yaml_file(&config_path)?;
    config.validate()?;
    info!(backends = config.backends.len(), "Loaded configuration");

    let surfaces = build_routes(&config)?;

    if config.main.reload_config {
        watch_config(PathBuf::from(&config_path), surfaces.clone())?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_server = match &surfaces.metrics {
        Some(metrics) => {
            let app = metrics
                .axum_router()
                .route("/metrics", get(metrics_handler));
            let bind_addr = format!(
                "{}:{}",
                config.metrics.listen_address, config.metrics.listen_port
            );
            info!("Starting metrics listener on {}", bind_addr);
            let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
            let mut rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = rx.changed().await;
                    })
                    .await
            }))
        }
        None => {
            info!("Metrics listener disabled");
            None
        }
    };

    let app = surfaces
        .frontend
        .axum_router()
        .route("/ping", get(ping))
        .layer(axum::middleware::from_fn(create_logging_middleware(
            config.frontend.logging.clone(),
        )))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TimeoutLayer::new(Duration::from_secs(config.frontend.timeout)))
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!(
        "{}:{}",
        config.frontend.listen_address, config.frontend.listen_port
    );
    info!("Starting proxy listener on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(server) = metrics_server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Metrics listener failed"),
            Err(e) => error!(error = %e, "Metrics listener task failed"),
        }
    }

    shutdown_tracing();
    info!("Server stopped gracefully");
    Ok(())
}

/// Build every service and register all backends on fresh surfaces
fn build_routes(config: &Config) -> Result<RouteSurfaces> {
    let services = Services::from_config(config)?;
    let surfaces = RouteSurfaces::new(config);
    let registration = register_all(config, &services, &surfaces, false)?;
    info!(
        backends = registration.backends.len(),
        default_backend = registration.default_backend.as_deref().unwrap_or("-"),
        "Registered routes"
    );
    Ok(surfaces)
}

/// Rebuild routes on every config change; a failed rebuild keeps the live ones
fn watch_config(path: PathBuf, surfaces: RouteSurfaces) -> Result<()> {
    let reloader = Arc::new(ConfigHotReload::new(path));
    let mut rx = reloader.subscribe();
    reloader.start_watching()?;

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(config) => match build_routes(&config) {
                    Ok(next) => {
                        surfaces.replace_with(&next);
                        info!("Swapped in reloaded routes");
                    }
                    Err(e) => error!(error = %e, "Route rebuild failed, keeping current routes"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed configuration updates");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    Ok(())
}

/// Handle shutdown signals for graceful termination
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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully");
        },
    }

    info!("Draining connections...");
    tokio::time::sleep(Duration::from_secs(1)).await;
}

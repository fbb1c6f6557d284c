use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway_core::clock::SystemClock;
use gateway_core::config::GatewayConfig;
use gateway_core::limiter::{janitor, GatewayEngine};
use gateway_core::{routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env()?;
    config.validate()?;

    tracing::info!("Starting gateway core...");

    let engine = Arc::new(GatewayEngine::new(config.clone(), Arc::new(SystemClock)));
    let state = AppState {
        engine: Arc::clone(&engine),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let janitor_handle = tokio::spawn(janitor::run(
        Arc::clone(&engine),
        config.cleanup_interval,
        shutdown_rx,
    ));

    // CORS is a pipeline slot this core doesn't own the policy for; a
    // permissive layer keeps the pipeline ordering intact for deployments
    // that front this gateway with their own CORS-terminating proxy.
    let cors = CorsLayer::permissive();

    let app = routes::app_routes(state.clone(), cors)
        .merge(routes::public_routes(state.clone()))
        .merge(routes::health_routes(state));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Gateway listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let _ = shutdown_tx.send(true);
    janitor_handle.await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

use std::time::Duration;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

use crate::handlers;
use crate::middleware::{
    auth_middleware, optional_auth_middleware, rate_limit_middleware, request_id_middleware,
    security_headers_middleware,
};
use crate::AppState;

/// Builds the router with the pipeline ordered:
/// request-id -> security-headers -> CORS -> recovery (via TraceLayer) ->
/// authentication -> rate limiter -> timeout -> handler.
///
/// `ServiceBuilder` layers apply outermost-first, so the list below reads
/// top-to-bottom in request order.
pub fn app_routes(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/v1/balance/:id", get(handlers::get_balance))
        .route("/v1/orders", post(handlers::create_order))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn(auth_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Routes that work anonymously but get the account layer on top when a
/// bearer token is presented — the "authentication" slot is optional here
/// rather than required.
pub fn public_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/market-data/:symbol", get(handlers::get_market_data))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn(optional_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Unauthenticated routes still run the full safety pipeline up to
/// authentication, but skip it — the rate limiter still enforces the IP
/// layer for them.
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

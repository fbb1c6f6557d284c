use std::sync::atomic::Ordering;

use axum::{extract::State, Json};

use crate::AppState;

/// Liveness probe. Always returns healthy once the process is serving
/// traffic — readiness concerns belong to a deployment-specific probe, not
/// this core.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "gateway_core",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Exposes the engine's admission counters, the nearest thing this core has
/// to an observability surface.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let metrics = &state.engine.metrics;
    Json(serde_json::json!({
        "allowed": metrics.allowed.load(Ordering::Relaxed),
        "denied_blacklist": metrics.denied_blacklist.load(Ordering::Relaxed),
        "denied_endpoint": metrics.denied_endpoint.load(Ordering::Relaxed),
        "denied_ip": metrics.denied_ip.load(Ordering::Relaxed),
        "denied_account": metrics.denied_account.load(Ordering::Relaxed),
        "denied_concurrency": metrics.denied_concurrency.load(Ordering::Relaxed),
    }))
}

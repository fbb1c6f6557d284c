use std::sync::Arc;

pub mod clock;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod limiter;
pub mod middleware;
pub mod routes;

use limiter::GatewayEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<GatewayEngine>,
}

use std::net::IpAddr;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::extractors::auth::AuthContext;
use crate::limiter::engine::CheckRequest;
use crate::limiter::CheckOutcome;
use crate::middleware::request_id::RequestId;
use crate::AppState;

/// Extracts the client address per `ip.trust_proxy_headers`: when the
/// gateway is deployed behind a trusted reverse proxy, the first hop of
/// `X-Forwarded-For` (falling back to `X-Real-Ip`) is authoritative;
/// otherwise the TCP peer address is used.
fn extract_client_ip(request: &Request, trust_proxy_headers: bool) -> IpAddr {
    if trust_proxy_headers {
        if let Some(xff) = request.headers().get("x-forwarded-for") {
            if let Ok(xff) = xff.to_str() {
                if let Some(ip) = xff.split(',').next().and_then(|s| s.trim().parse().ok()) {
                    return ip;
                }
            }
        }
        if let Some(xri) = request.headers().get("x-real-ip") {
            if let Ok(ip) = xri.to_str().unwrap_or_default().trim().parse() {
                return ip;
            }
        }
    }

    request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
}

/// The decision point of the pipeline: runs every layer of the limiter,
/// applies its headers to the response, then feeds the handler's status
/// code back into the caller's behavior tracker.
pub async fn rate_limit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let trust_proxy = state.engine.config().ip.trust_proxy_headers;
    let ip = extract_client_ip(&request, trust_proxy);
    let auth = request.extensions().get::<AuthContext>().cloned();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let check_req = CheckRequest {
        ip,
        user_id: auth.as_ref().map(|a| a.user_id.clone()),
        tier: auth.as_ref().map(|a| a.tier.clone()),
        method,
        path,
    };

    match state.engine.check(&check_req) {
        CheckOutcome::Denied(denial) => {
            use axum::response::IntoResponse;
            let denial = match request.extensions().get::<RequestId>() {
                Some(id) => denial.with_request_id(id.0.clone()),
                None => denial,
            };
            denial.into_response()
        }
        CheckOutcome::Allowed { headers, guard } => {
            let mut response = next.run(request).await;
            headers.apply(response.headers_mut());

            if let Some(user_id) = check_req.user_id {
                state.engine.record_outcome(&user_id, response.status().as_u16());
            }
            drop(guard);
            response
        }
    }
}

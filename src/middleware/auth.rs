use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::extractors::auth::AuthContext;

/// Parses `Authorization: Bearer <user_id>:<tier>`. This core cares about the
/// admission decision, not how identity is actually proven — production
/// deployments swap this for a real session/JWT verifier upstream of the
/// gateway and still populate the same `AuthContext` extension.
fn parse_bearer(request: &Request) -> Option<AuthContext> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?;
    let token = value.strip_prefix("Bearer ")?.trim();
    let (user_id, tier) = token.split_once(':')?;
    if user_id.is_empty() || tier.is_empty() {
        return None;
    }
    Some(AuthContext {
        user_id: user_id.to_string(),
        tier: tier.to_string(),
    })
}

/// Requires a valid bearer token; rejects with 401 otherwise.
pub async fn auth_middleware(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let ctx = parse_bearer(&request).ok_or(StatusCode::UNAUTHORIZED)?;
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

/// Populates `AuthContext` when present but never rejects — used ahead of
/// the rate limiter so anonymous traffic still gets IP-layer enforcement.
pub async fn optional_auth_middleware(mut request: Request, next: Next) -> Response {
    if let Some(ctx) = parse_bearer(&request) {
        request.extensions_mut().insert(ctx);
    }
    next.run(request).await
}

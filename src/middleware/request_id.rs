use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Stamps every request with a correlation ID before it reaches the rate
/// limiter or the handler.
///
/// - An incoming `x-request-id` is preserved (a reverse proxy ahead of this
///   gateway may already have generated one); otherwise a UUID v4 is minted.
/// - The ID is inserted into the request extensions so
///   `rate_limit_middleware` can attach it to a denial body, and echoed back
///   on the response headers so a client can correlate a 429/403 with the
///   gateway's own structured logs for that request.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    // Reuse an existing request ID from the incoming headers, or generate a new one.
    let id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // Store in request extensions so downstream handlers can access it.
    request.extensions_mut().insert(RequestId(id.clone()));

    // Attach the request ID to the tracing span for structured logging.
    let _span = tracing::info_span!("request", request_id = %id);

    let mut response = next.run(request).await;

    // Always echo the request ID back in the response headers.
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(&REQUEST_ID_HEADER, value);
    }

    response
}

/// Typed wrapper around the request ID, stored in request extensions and
/// read back out by `rate_limit_middleware` via
/// `request.extensions().get::<RequestId>()`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::warn;

/// Baseline request sanity checks and response security headers, ahead of
/// CORS and the rate limiter in the pipeline.
pub async fn security_headers_middleware(
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    validate_request(&request)?;
    let mut response = next.run(request).await;
    add_security_headers(&mut response);
    Ok(response)
}

fn validate_request(request: &Request) -> Result<(), StatusCode> {
    let path = request.uri().path();
    let query = request.uri().query().unwrap_or("");

    if contains_path_traversal(path) || contains_path_traversal(query) {
        warn!(%path, %query, "path traversal pattern rejected");
        return Err(StatusCode::BAD_REQUEST);
    }

    for (name, value) in request.headers().iter() {
        if value.len() > 8192 {
            warn!(header = %name, size = value.len(), "oversized header rejected");
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    Ok(())
}

fn contains_path_traversal(input: &str) -> bool {
    const PATTERNS: &[&str] = &[
        "../", "..\\", "..%2f", "..%5c", "%2e%2e%2f", "%2e%2e%5c", "%00",
    ];
    let lower = input.to_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

fn add_security_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_path_traversal() {
        assert!(contains_path_traversal("../etc/passwd"));
        assert!(contains_path_traversal("%2e%2e%2fetc%2fpasswd"));
        assert!(!contains_path_traversal("/v1/balance/acct_123"));
    }
}

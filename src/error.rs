use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Denial taxonomy the decision engine surfaces to callers.
///
/// `ConfigInvalid` is construction-time only — it never reaches a client; it
/// aborts startup before `axum::serve` is reached.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("ip blacklisted")]
    Blacklisted,

    #[error("endpoint rate limit exceeded")]
    EndpointLimit,

    #[error("ip temporarily blocked")]
    IpBlocked,

    #[error("ip rate limit exceeded")]
    IpLimit,

    #[error("account rate limit exceeded")]
    AccountLimit,

    #[error("concurrent request limit exceeded")]
    ConcurrencyLimit,

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl GatewayError {
    /// `layer` label attached to the `rate_limit_exceeded` event.
    pub fn layer_label(&self, endpoint_path: &str, tier: Option<&str>) -> String {
        match self {
            GatewayError::EndpointLimit => format!("endpoint:{endpoint_path}"),
            GatewayError::IpBlocked | GatewayError::IpLimit => "ip".to_string(),
            GatewayError::AccountLimit => format!("account:{}", tier.unwrap_or("unknown")),
            GatewayError::ConcurrencyLimit => "concurrency".to_string(),
            GatewayError::Blacklisted => "blacklist".to_string(),
            GatewayError::ConfigInvalid(_) => "config".to_string(),
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::Blacklisted => (StatusCode::FORBIDDEN, "IP_BLACKLISTED"),
            GatewayError::EndpointLimit
            | GatewayError::IpBlocked
            | GatewayError::IpLimit
            | GatewayError::AccountLimit
            | GatewayError::ConcurrencyLimit => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED")
            }
            GatewayError::ConfigInvalid(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_INVALID")
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct DenialBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

/// Response headers exposed on both allow and deny.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(self.limit),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(self.remaining),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderValue::from(self.reset),
        );
        if let Some(retry_after) = self.retry_after {
            headers.insert(
                HeaderName::from_static("retry-after"),
                HeaderValue::from(retry_after),
            );
        }
    }
}

/// A denial carries both the error kind and the headers computed for it, plus
/// the endpoint's custom message when the matched budget configured one and
/// the request ID that correlates it with the request's tracing span.
#[derive(Debug, Clone)]
pub struct Denial {
    pub error: GatewayError,
    pub headers: RateLimitHeaders,
    pub custom_message: Option<String>,
    pub request_id: Option<String>,
}

impl Denial {
    /// Attaches the caller's request ID so the denial body and the log line
    /// for the same request can be correlated.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let (status, code) = self.error.status_and_code();
        let message = self
            .custom_message
            .unwrap_or_else(|| self.error.to_string());
        let mut response = (
            status,
            Json(DenialBody {
                error: message,
                code,
                request_id: self.request_id,
            }),
        )
            .into_response();
        self.headers.apply(response.headers_mut());
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let GatewayError::ConfigInvalid(msg) = &self {
            tracing::error!(error = %msg, "configuration error surfaced past startup");
        }
        Denial {
            error: self,
            headers: RateLimitHeaders::default(),
            custom_message: None,
            request_id: None,
        }
        .into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

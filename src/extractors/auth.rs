use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

/// Identity established by `auth_middleware`: the account key the rate
/// limiter's account layer enforces against.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub tier: String,
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Optional identity — doesn't fail if the request is unauthenticated.
#[derive(Debug, Clone)]
pub struct OptionalAuthContext(pub Option<AuthContext>);

impl<S> FromRequestParts<S> for OptionalAuthContext
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuthContext(parts.extensions.get::<AuthContext>().cloned()))
    }
}

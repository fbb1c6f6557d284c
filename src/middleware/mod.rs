pub mod auth;
pub mod rate_limit;
pub mod request_id;
pub mod security;

pub use auth::{auth_middleware, optional_auth_middleware};
pub use rate_limit::rate_limit_middleware;
pub use request_id::request_id_middleware;
pub use security::security_headers_middleware;

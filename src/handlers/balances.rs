use axum::{extract::Path, Json};

use crate::extractors::auth::AuthContext;

/// Illustrative downstream endpoint — stands in for whatever the gateway
/// actually fronts. The interesting work happens in the middleware stack
/// before this function is ever reached.
pub async fn get_balance(auth: AuthContext, Path(account_id): Path<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "account_id": account_id,
        "requested_by": auth.user_id,
        "tier": auth.tier,
        "balance": "0",
    }))
}

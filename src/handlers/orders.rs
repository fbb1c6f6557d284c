use axum::Json;
use serde::Deserialize;

use crate::extractors::auth::AuthContext;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
}

/// Illustrative write endpoint, the write-side counterpart to
/// `get_balance` — exercises the account and concurrency layers under a
/// `POST` budget.
pub async fn create_order(
    auth: AuthContext,
    Json(req): Json<CreateOrderRequest>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "accepted_by": auth.user_id,
        "tier": auth.tier,
        "symbol": req.symbol,
        "side": req.side,
        "quantity": req.quantity,
        "status": "accepted",
    }))
}

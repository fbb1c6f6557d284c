use axum::{extract::Path, Json};

use crate::extractors::auth::OptionalAuthContext;

/// Public read endpoint — reachable anonymously (IP layer only) or with a
/// bearer token (adds the account layer on top). Exercises the optional-auth
/// half of the pipeline that `get_balance`/`create_order` don't.
pub async fn get_market_data(
    OptionalAuthContext(auth): OptionalAuthContext,
    Path(symbol): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "symbol": symbol,
        "authenticated": auth.is_some(),
        "price": "0",
    }))
}

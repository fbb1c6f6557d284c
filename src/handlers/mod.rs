pub mod balances;
pub mod health;
pub mod market_data;
pub mod orders;

pub use balances::get_balance;
pub use health::{health_check, metrics_endpoint};
pub use market_data::get_market_data;
pub use orders::create_order;

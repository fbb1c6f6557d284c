mod settings;

pub use settings::{
    AdaptiveConfig, EndpointBudgetConfig, EndpointKey, GatewayConfig, IpConfig, ServerConfig,
    TierConfig,
};

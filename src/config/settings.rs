use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;

use axum::http::Method;
use ipnet::IpNet;
use serde::Deserialize;

use crate::error::GatewayError;

/// Server port/host, kept flat and env-driven the way the rest of this
/// gateway's scalar settings are.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct IpConfig {
    pub enabled: bool,
    pub default_rps: f64,
    pub default_burst: f64,
    pub auto_block_threshold: u32,
    pub block_duration: Duration,
    pub whitelist_ips: HashSet<IpAddr>,
    pub blacklist_ips: HashSet<IpAddr>,
    pub whitelist_cidrs: Vec<IpNet>,
    pub blacklist_cidrs: Vec<IpNet>,
    /// Whether `X-Forwarded-For`/`X-Real-Ip` are trusted. Off by default —
    /// the client-facing address is used unless a trust boundary is
    /// explicitly configured.
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TierConfig {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
    pub burst: u32,
    pub concurrent: u32,
}

#[derive(Debug, Clone)]
pub struct EndpointBudgetConfig {
    pub enabled: bool,
    pub rps: f64,
    pub burst: f64,
    pub skip_ip_limit: bool,
    pub custom_message: Option<String>,
}

pub type EndpointKey = (Method, String);

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    pub trust_threshold: u32,
    pub suspicion_threshold: u32,
    pub max_trust_level: u32,
    pub max_suspicion_level: u32,
    pub trust_multiplier: f64,
    pub suspicion_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub enabled: bool,
    pub ip: IpConfig,
    pub tiers: HashMap<String, TierConfig>,
    pub endpoints: HashMap<EndpointKey, EndpointBudgetConfig>,
    pub adaptive: AdaptiveConfig,
    pub cleanup_interval: Duration,
    pub idle_threshold: Duration,
}

// ---------------------------------------------------------------------------
// Raw, serde-friendly shapes loaded via the `config` crate. Structured
// settings (tiers, endpoint overrides, CIDR/IP lists) come from an optional
// TOML file layered under environment overrides, the way the rest of this
// gateway treats env vars as the final word.
// ---------------------------------------------------------------------------

const DEFAULT_TOML: &str = r#"
enabled = true
cleanup_interval_secs = 60
idle_threshold_secs = 600

[ip]
enabled = true
default_rps = 10.0
default_burst = 20.0
auto_block_threshold = 5
block_duration_secs = 900
whitelist_ips = []
blacklist_ips = []
whitelist_cidrs = []
blacklist_cidrs = []
trust_proxy_headers = false

[adaptive]
enabled = true
trust_threshold = 10
suspicion_threshold = 3
max_trust_level = 5
max_suspicion_level = 10
trust_multiplier = 2.0
suspicion_multiplier = 0.5

[tiers.free]
per_minute = 60
per_hour = 1000
per_day = 10000
burst = 10
concurrent = 2

[tiers.pro]
per_minute = 600
per_hour = 20000
per_day = 200000
burst = 50
concurrent = 10

[[endpoints]]
method = "GET"
path = "/v1/balance/:id"
enabled = true
rps = 5.0
burst = 10.0
skip_ip_limit = false
"#;

#[derive(Debug, Deserialize)]
struct RawIpConfig {
    enabled: bool,
    default_rps: f64,
    default_burst: f64,
    auto_block_threshold: u32,
    block_duration_secs: u64,
    whitelist_ips: Vec<String>,
    blacklist_ips: Vec<String>,
    whitelist_cidrs: Vec<String>,
    blacklist_cidrs: Vec<String>,
    trust_proxy_headers: bool,
}

#[derive(Debug, Deserialize)]
struct RawTierConfig {
    per_minute: u32,
    per_hour: u32,
    per_day: u32,
    burst: u32,
    concurrent: u32,
}

#[derive(Debug, Deserialize)]
struct RawEndpointConfig {
    method: String,
    path: String,
    enabled: bool,
    rps: f64,
    burst: f64,
    #[serde(default)]
    skip_ip_limit: bool,
    #[serde(default)]
    custom_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAdaptiveConfig {
    enabled: bool,
    trust_threshold: u32,
    suspicion_threshold: u32,
    max_trust_level: u32,
    max_suspicion_level: u32,
    trust_multiplier: f64,
    suspicion_multiplier: f64,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    enabled: bool,
    cleanup_interval_secs: u64,
    idle_threshold_secs: u64,
    ip: RawIpConfig,
    adaptive: RawAdaptiveConfig,
    tiers: HashMap<String, RawTierConfig>,
    #[serde(default)]
    endpoints: Vec<RawEndpointConfig>,
}

impl GatewayConfig {
    /// Loads scalar server settings from the environment the way the rest of
    /// this gateway does (`dotenvy` + `std::env::var`), and the structured
    /// rate-limit settings (tiers, endpoint overrides, membership lists) from
    /// the built-in defaults layered with an optional TOML file
    /// (`GATEWAY_CONFIG_FILE`) and `GATEWAY__`-prefixed environment
    /// overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let server = ServerConfig {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        };

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_TOML, config::FileFormat::Toml));

        if let Ok(path) = std::env::var("GATEWAY_CONFIG_FILE") {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("GATEWAY")
                .separator("__")
                .try_parsing(true),
        );

        let raw: RawConfig = builder.build()?.try_deserialize()?;

        Self::from_raw(server, raw)
    }

    fn from_raw(server: ServerConfig, raw: RawConfig) -> anyhow::Result<Self> {
        let parse_ips = |items: &[String]| -> anyhow::Result<HashSet<IpAddr>> {
            items
                .iter()
                .map(|s| s.parse::<IpAddr>().map_err(anyhow::Error::from))
                .collect()
        };
        let parse_cidrs = |items: &[String]| -> anyhow::Result<Vec<IpNet>> {
            items
                .iter()
                .map(|s| s.parse::<IpNet>().map_err(anyhow::Error::from))
                .collect()
        };

        let ip = IpConfig {
            enabled: raw.ip.enabled,
            default_rps: raw.ip.default_rps,
            default_burst: raw.ip.default_burst,
            auto_block_threshold: raw.ip.auto_block_threshold,
            block_duration: Duration::from_secs(raw.ip.block_duration_secs),
            whitelist_ips: parse_ips(&raw.ip.whitelist_ips)?,
            blacklist_ips: parse_ips(&raw.ip.blacklist_ips)?,
            whitelist_cidrs: parse_cidrs(&raw.ip.whitelist_cidrs)?,
            blacklist_cidrs: parse_cidrs(&raw.ip.blacklist_cidrs)?,
            trust_proxy_headers: raw.ip.trust_proxy_headers,
        };

        let tiers = raw
            .tiers
            .into_iter()
            .map(|(name, t)| {
                (
                    name,
                    TierConfig {
                        per_minute: t.per_minute,
                        per_hour: t.per_hour,
                        per_day: t.per_day,
                        burst: t.burst,
                        concurrent: t.concurrent,
                    },
                )
            })
            .collect();

        let mut endpoints = HashMap::new();
        for e in raw.endpoints {
            let method = Method::from_bytes(e.method.to_uppercase().as_bytes())
                .map_err(|_| anyhow::anyhow!("invalid endpoint method: {}", e.method))?;
            endpoints.insert(
                (method, e.path),
                EndpointBudgetConfig {
                    enabled: e.enabled,
                    rps: e.rps,
                    burst: e.burst,
                    skip_ip_limit: e.skip_ip_limit,
                    custom_message: e.custom_message,
                },
            );
        }

        let adaptive = AdaptiveConfig {
            enabled: raw.adaptive.enabled,
            trust_threshold: raw.adaptive.trust_threshold,
            suspicion_threshold: raw.adaptive.suspicion_threshold,
            max_trust_level: raw.adaptive.max_trust_level,
            max_suspicion_level: raw.adaptive.max_suspicion_level,
            trust_multiplier: raw.adaptive.trust_multiplier,
            suspicion_multiplier: raw.adaptive.suspicion_multiplier,
        };

        Ok(Self {
            server,
            enabled: raw.enabled,
            ip,
            tiers,
            endpoints,
            adaptive,
            cleanup_interval: Duration::from_secs(raw.cleanup_interval_secs),
            idle_threshold: Duration::from_secs(raw.idle_threshold_secs),
        })
    }

    /// Construction-time validation. Aborts startup on failure — never
    /// surfaced as an HTTP response.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.ip.enabled && (self.ip.default_rps <= 0.0 || self.ip.default_burst <= 0.0) {
            return Err(GatewayError::ConfigInvalid(
                "ip.default_rps and ip.default_burst must be positive".to_string(),
            ));
        }
        if self.tiers.is_empty() {
            return Err(GatewayError::ConfigInvalid(
                "at least one tier must be configured".to_string(),
            ));
        }
        for (name, tier) in &self.tiers {
            if tier.burst == 0 || tier.per_minute == 0 {
                return Err(GatewayError::ConfigInvalid(format!(
                    "tier '{name}' must have positive burst and per_minute"
                )));
            }
        }
        for (key, budget) in &self.endpoints {
            if budget.enabled && (budget.rps <= 0.0 || budget.burst <= 0.0) {
                return Err(GatewayError::ConfigInvalid(format!(
                    "endpoint {:?} must have positive rps and burst",
                    key
                )));
            }
        }
        if self.adaptive.suspicion_multiplier > self.adaptive.trust_multiplier {
            return Err(GatewayError::ConfigInvalid(
                "adaptive.suspicion_multiplier must not exceed adaptive.trust_multiplier"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_toml_parses_and_validates() {
        let server = ServerConfig {
            port: 8080,
            host: "0.0.0.0".to_string(),
        };
        let raw: RawConfig = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_TOML, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let cfg = GatewayConfig::from_raw(server, raw).unwrap();
        assert!(cfg.validate().is_ok());
        assert!(cfg.tiers.contains_key("free"));
        assert!(cfg.tiers.contains_key("pro"));
    }

    #[test]
    fn empty_tier_table_is_invalid() {
        let cfg = GatewayConfig {
            server: ServerConfig {
                port: 8080,
                host: "0.0.0.0".into(),
            },
            enabled: true,
            ip: IpConfig {
                enabled: true,
                default_rps: 1.0,
                default_burst: 1.0,
                auto_block_threshold: 3,
                block_duration: Duration::from_secs(60),
                whitelist_ips: HashSet::new(),
                blacklist_ips: HashSet::new(),
                whitelist_cidrs: vec![],
                blacklist_cidrs: vec![],
                trust_proxy_headers: false,
            },
            tiers: HashMap::new(),
            endpoints: HashMap::new(),
            adaptive: AdaptiveConfig {
                enabled: true,
                trust_threshold: 10,
                suspicion_threshold: 3,
                max_trust_level: 5,
                max_suspicion_level: 10,
                trust_multiplier: 2.0,
                suspicion_multiplier: 0.5,
            },
            cleanup_interval: Duration::from_secs(60),
            idle_threshold: Duration::from_secs(600),
        };
        assert!(cfg.validate().is_err());
    }
}

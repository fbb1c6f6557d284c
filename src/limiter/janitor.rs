use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::engine::GatewayEngine;

/// Background cleanup loop: sweeps idle per-key state and expired blacklist
/// holds on a fixed interval, stopping as soon as `shutdown` fires.
pub async fn run(engine: Arc<GatewayEngine>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                engine.sweep_idle();
                tracing::debug!("janitor sweep completed");
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("janitor shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::clock::TestClock;
    use crate::config::{AdaptiveConfig, GatewayConfig, IpConfig, ServerConfig};

    fn minimal_config() -> GatewayConfig {
        GatewayConfig {
            server: ServerConfig {
                port: 8080,
                host: "0.0.0.0".into(),
            },
            enabled: true,
            ip: IpConfig {
                enabled: true,
                default_rps: 1.0,
                default_burst: 2.0,
                auto_block_threshold: 3,
                block_duration: Duration::from_secs(60),
                whitelist_ips: Default::default(),
                blacklist_ips: Default::default(),
                whitelist_cidrs: vec![],
                blacklist_cidrs: vec![],
                trust_proxy_headers: false,
            },
            tiers: HashMap::new(),
            endpoints: HashMap::new(),
            adaptive: AdaptiveConfig {
                enabled: false,
                trust_threshold: 10,
                suspicion_threshold: 3,
                max_trust_level: 5,
                max_suspicion_level: 10,
                trust_multiplier: 2.0,
                suspicion_multiplier: 0.5,
            },
            cleanup_interval: Duration::from_millis(5),
            idle_threshold: Duration::from_secs(600),
        }
    }

    #[tokio::test]
    async fn run_exits_promptly_on_shutdown_signal() {
        let engine = Arc::new(GatewayEngine::new(minimal_config(), Arc::new(TestClock::new())));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run(engine, Duration::from_millis(5), rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).expect("receiver still alive");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("janitor task did not exit after shutdown signal")
            .expect("janitor task panicked");
    }

    #[tokio::test]
    async fn run_sweeps_idle_entries_on_each_tick() {
        let clock = Arc::new(TestClock::new());
        let engine = Arc::new(GatewayEngine::new(minimal_config(), clock.clone()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run(Arc::clone(&engine), Duration::from_millis(5), rx));

        // A few ticks should have fired and called `sweep_idle` without
        // touching a clock nothing has advanced, so it's a no-op sweep —
        // this just confirms the loop doesn't stall or panic under repeated
        // ticks before shutdown.
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).expect("receiver still alive");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("janitor task did not exit after shutdown signal")
            .expect("janitor task panicked");
    }
}

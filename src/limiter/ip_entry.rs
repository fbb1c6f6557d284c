use std::time::Instant;

use super::token_bucket::TokenBucket;
use crate::config::IpConfig;

/// Per-IP limiter state: one token bucket, a violation counter, and an
/// auto-block hold.
#[derive(Debug)]
pub struct IpEntry {
    pub bucket: TokenBucket,
    pub violations: u32,
    pub blocked: bool,
    pub block_until: Option<Instant>,
    pub last_seen: Instant,
}

impl IpEntry {
    pub fn new(config: &IpConfig, now: Instant) -> Self {
        Self {
            bucket: TokenBucket::new(config.default_rps, config.default_burst, now),
            violations: 0,
            blocked: false,
            block_until: None,
            last_seen: now,
        }
    }

    /// Self-release: once `now >= block_until`, the entry clears `blocked`
    /// and resets `violations`. Idempotent — calling this on an
    /// already-normal entry is a no-op.
    pub fn maybe_self_release(&mut self, now: Instant) {
        if self.blocked {
            if let Some(until) = self.block_until {
                if now >= until {
                    self.blocked = false;
                    self.block_until = None;
                    self.violations = 0;
                }
            }
        }
    }

    pub fn is_idle(&self, now: Instant, idle_threshold: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_seen) >= idle_threshold
    }
}

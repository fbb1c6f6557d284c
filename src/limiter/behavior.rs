use std::time::Instant;

use crate::config::AdaptiveConfig;

/// Per-user success/failure history driving the trust/suspicion multiplier.
#[derive(Debug)]
pub struct BehaviorTracker {
    pub success_count: u64,
    pub failure_count: u64,
    pub consec_success: u32,
    pub consec_failure: u32,
    pub trust_level: u32,
    pub suspicion_level: u32,
    pub last_activity: Instant,
}

/// Outcome of recording a failure: `Some(level)` when suspicion just crossed
/// the configured event threshold, so the caller can fire `suspicious_activity`.
pub type SuspicionAlert = Option<u32>;

impl BehaviorTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            consec_success: 0,
            consec_failure: 0,
            trust_level: 0,
            suspicion_level: 0,
            last_activity: now,
        }
    }

    pub fn record_success(&mut self, cfg: &AdaptiveConfig, now: Instant) {
        self.success_count += 1;
        self.consec_success += 1;
        self.consec_failure = 0;
        self.last_activity = now;

        if self.consec_success >= cfg.trust_threshold {
            self.trust_level = (self.trust_level + 1).min(cfg.max_trust_level);
            self.consec_success = 0;
        }
        if self.suspicion_level > 0 {
            self.suspicion_level -= 1;
        }
    }

    pub fn record_failure(&mut self, cfg: &AdaptiveConfig, now: Instant) -> SuspicionAlert {
        self.failure_count += 1;
        self.consec_failure += 1;
        self.consec_success = 0;
        self.last_activity = now;

        let mut alert = None;
        if self.consec_failure >= cfg.suspicion_threshold {
            self.suspicion_level = (self.suspicion_level + 1).min(cfg.max_suspicion_level);
            self.consec_failure = 0;
            if self.suspicion_level >= 3 {
                alert = Some(self.suspicion_level);
            }
        }
        if self.trust_level > 0 {
            self.trust_level -= 1;
        }
        alert
    }

    /// `behavior_multiplier`. Always in
    /// `[cfg.suspicion_multiplier, cfg.trust_multiplier]`.
    pub fn multiplier(&self, cfg: &AdaptiveConfig) -> f64 {
        let mut m = 1.0;
        m *= 1.0 + 0.2 * self.trust_level as f64;
        m = m.min(cfg.trust_multiplier);
        m *= 1.0 - 0.1 * self.suspicion_level as f64;
        m.max(cfg.suspicion_multiplier)
    }

    pub fn is_idle(&self, now: Instant, idle_threshold: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= idle_threshold
    }
}

/// Classifies an HTTP status: `[200,400)` is success, `[400,..)` is failure,
/// anything else (e.g. below 200) is ignored.
pub fn classify_status(status: u16) -> Option<bool> {
    if (200..400).contains(&status) {
        Some(true)
    } else if status >= 400 {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AdaptiveConfig {
        AdaptiveConfig {
            enabled: true,
            trust_threshold: 10,
            suspicion_threshold: 3,
            max_trust_level: 5,
            max_suspicion_level: 10,
            trust_multiplier: 2.0,
            suspicion_multiplier: 0.5,
        }
    }

    #[test]
    fn trust_promotion_at_threshold_multiples() {
        let cfg = cfg();
        let mut tracker = BehaviorTracker::new(Instant::now());
        for k in 1..=5u32 {
            for _ in 0..cfg.trust_threshold {
                tracker.record_success(&cfg, Instant::now());
            }
            assert_eq!(tracker.trust_level, k.min(cfg.max_trust_level));
        }
        // 5 * 10 = 50 successes issued; further successes stay clamped.
        for _ in 0..cfg.trust_threshold {
            tracker.record_success(&cfg, Instant::now());
        }
        assert_eq!(tracker.trust_level, cfg.max_trust_level);
        assert_eq!(tracker.multiplier(&cfg), cfg.trust_multiplier);
    }

    #[test]
    fn suspicion_fires_event_at_level_three() {
        let cfg = cfg();
        let mut tracker = BehaviorTracker::new(Instant::now());
        let mut fired = None;
        for _ in 0..3 {
            for _ in 0..cfg.suspicion_threshold {
                if let Some(level) = tracker.record_failure(&cfg, Instant::now()) {
                    fired = Some(level);
                }
            }
        }
        assert_eq!(tracker.suspicion_level, 3);
        assert_eq!(fired, Some(3));
    }

    #[test]
    fn multiplier_always_within_bounds() {
        let cfg = cfg();
        for trust in 0..=10u32 {
            for suspicion in 0..=10u32 {
                let tracker = BehaviorTracker {
                    success_count: 0,
                    failure_count: 0,
                    consec_success: 0,
                    consec_failure: 0,
                    trust_level: trust,
                    suspicion_level: suspicion,
                    last_activity: Instant::now(),
                };
                let m = tracker.multiplier(&cfg);
                assert!(m >= cfg.suspicion_multiplier && m <= cfg.trust_multiplier);
            }
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(200), Some(true));
        assert_eq!(classify_status(399), Some(true));
        assert_eq!(classify_status(400), Some(false));
        assert_eq!(classify_status(503), Some(false));
        assert_eq!(classify_status(100), None);
    }
}

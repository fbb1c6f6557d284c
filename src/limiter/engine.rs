use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::http::Method;
use dashmap::DashMap;

use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::error::{Denial, GatewayError, RateLimitHeaders};

use super::account_entry::AccountEntry;
use super::behavior::{classify_status, BehaviorTracker};
use super::events::{EventSink, RateLimitEvent, TracingEventSink};
use super::ip_entry::IpEntry;
use super::membership::{Blacklist, MembershipIndex};
use super::token_bucket::{Reservation, TokenBucket};

/// Everything the engine needs to know about one incoming request to reach a
/// decision.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub ip: IpAddr,
    pub user_id: Option<String>,
    pub tier: Option<String>,
    pub method: Method,
    pub path: String,
}

#[derive(Debug)]
pub enum CheckOutcome {
    Allowed {
        headers: RateLimitHeaders,
        guard: Option<ConcurrencyGuard>,
    },
    Denied(Denial),
}

/// Counters mirroring the sibling repos' `RateLimitMetrics` shape — plain
/// atomics rather than a metrics-crate histogram, since this core exposes
/// them only through the health/metrics stand-in endpoint.
#[derive(Debug, Default)]
pub struct RateLimitMetrics {
    pub allowed: AtomicU64,
    pub denied_blacklist: AtomicU64,
    pub denied_endpoint: AtomicU64,
    pub denied_ip: AtomicU64,
    pub denied_account: AtomicU64,
    pub denied_concurrency: AtomicU64,
}

impl RateLimitMetrics {
    fn record_denial(&self, error: &GatewayError) {
        let counter = match error {
            GatewayError::Blacklisted => &self.denied_blacklist,
            GatewayError::EndpointLimit => &self.denied_endpoint,
            GatewayError::IpBlocked | GatewayError::IpLimit => &self.denied_ip,
            GatewayError::AccountLimit => &self.denied_account,
            GatewayError::ConcurrencyLimit => &self.denied_concurrency,
            GatewayError::ConfigInvalid(_) => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decrements `in_flight` for one account key exactly once, on every exit
/// path — normal return, early error, panic unwind, or a timeout layer
/// dropping the future. The `Drop` impl is the only place that mutates the
/// count, the same way a pooled connection guard releases its slot.
pub struct ConcurrencyGuard {
    accounts: Arc<DashMap<String, AccountEntry>>,
    key: String,
}

impl Drop for ConcurrencyGuard {
    fn drop(&mut self) {
        if let Some(mut entry) = self.accounts.get_mut(&self.key) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
    }
}

impl std::fmt::Debug for ConcurrencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGuard").field("key", &self.key).finish()
    }
}

/// The request-admission core: owns every piece of per-key state and runs
/// the ordered decision pipeline.
pub struct GatewayEngine {
    config: GatewayConfig,
    clock: Arc<dyn Clock>,
    membership: MembershipIndex,
    blacklist: Blacklist,
    ip_entries: DashMap<IpAddr, IpEntry>,
    accounts: Arc<DashMap<String, AccountEntry>>,
    behavior: DashMap<String, BehaviorTracker>,
    endpoint_buckets: DashMap<(Method, String), super::token_bucket::TokenBucket>,
    events: Arc<dyn EventSink>,
    pub metrics: RateLimitMetrics,
}

impl GatewayEngine {
    pub fn new(config: GatewayConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_event_sink(config, clock, Arc::new(TracingEventSink))
    }

    pub fn with_event_sink(
        config: GatewayConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let now = clock.now();
        let membership = MembershipIndex::new(
            config.ip.whitelist_ips.clone(),
            config.ip.whitelist_cidrs.clone(),
            config.ip.blacklist_cidrs.clone(),
        );
        let blacklist = Blacklist::new(&config.ip.blacklist_ips, now);
        Self {
            config,
            clock,
            membership,
            blacklist,
            ip_entries: DashMap::new(),
            accounts: Arc::new(DashMap::new()),
            behavior: DashMap::new(),
            endpoint_buckets: DashMap::new(),
            events,
            metrics: RateLimitMetrics::default(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn endpoint_key(&self, req: &CheckRequest) -> (Method, String) {
        (req.method.clone(), req.path.clone())
    }

    /// Runs the full decision pipeline: enabled gate, blacklist, whitelist
    /// bypass, endpoint budget, IP layer, account layer + concurrency.
    /// Returns `Allowed` with headers and (if an account is known) a
    /// concurrency guard, or `Denied` with the first violated layer.
    ///
    /// Whitelist membership short-circuits straight to `Allowed` ahead of
    /// the endpoint-budget, IP, and account layers — none of them run for a
    /// whitelisted caller.
    pub fn check(&self, req: &CheckRequest) -> CheckOutcome {
        let now = self.clock.now();

        if !self.config.enabled {
            return CheckOutcome::Allowed {
                headers: RateLimitHeaders::default(),
                guard: None,
            };
        }

        if self.config.ip.enabled && self.blacklist.is_blacklisted(req.ip, &self.membership, now) {
            self.events.emit(RateLimitEvent::RateLimitBlacklist {
                ip: req.ip,
                path: req.path.clone(),
            });
            return self.deny(GatewayError::Blacklisted, req, None, now);
        }

        if self.config.ip.enabled && self.membership.is_whitelisted(req.ip) {
            return CheckOutcome::Allowed {
                headers: RateLimitHeaders::default(),
                guard: None,
            };
        }

        let endpoint_key = self.endpoint_key(req);
        if let Some(budget) = self.config.endpoints.get(&endpoint_key) {
            if budget.enabled {
                let mut bucket = self
                    .endpoint_buckets
                    .entry(endpoint_key.clone())
                    .or_insert_with(|| TokenBucket::new(budget.rps, budget.burst, now));
                let wait = match bucket.reserve(now) {
                    Reservation::Immediate => None,
                    Reservation::Wait(wait) => Some(wait),
                    // Misconfiguration caught by `validate()` for every
                    // budget reachable from config; fall back to a
                    // one-second wait rather than a zero-length denial.
                    Reservation::Impossible => Some(Duration::from_secs(1)),
                };
                if let Some(wait) = wait {
                    let headers = Self::wait_headers(&bucket, wait);
                    drop(bucket);
                    return self.deny_with_message(
                        GatewayError::EndpointLimit,
                        req,
                        None,
                        headers,
                        budget.custom_message.clone(),
                    );
                }
            }
        }

        if self.config.ip.enabled && !self.config.endpoints.get(&endpoint_key).is_some_and(|b| b.skip_ip_limit) {
            if let Some(denial) = self.check_ip(req, now) {
                return CheckOutcome::Denied(denial);
            }
        }

        self.check_account(req, now)
    }

    fn check_ip(&self, req: &CheckRequest, now: Instant) -> Option<Denial> {
        let mut entry = self
            .ip_entries
            .entry(req.ip)
            .or_insert_with(|| IpEntry::new(&self.config.ip, now));
        entry.last_seen = now;
        entry.maybe_self_release(now);

        if entry.blocked {
            let wait = entry
                .block_until
                .map(|until| until.saturating_duration_since(now))
                .unwrap_or_default();
            let headers = Self::wait_headers(&entry.bucket, wait);
            return Some(self.build_denial(GatewayError::IpBlocked, req, None, headers));
        }

        if entry.bucket.try_acquire(now) {
            return None;
        }

        entry.violations += 1;
        let headers = Self::wait_headers(&entry.bucket, Duration::from_secs_f64(entry.bucket.wait_seconds()));
        if self.config.ip.auto_block_threshold > 0 && entry.violations >= self.config.ip.auto_block_threshold {
            let until = now + self.config.ip.block_duration;
            entry.blocked = true;
            entry.block_until = Some(until);
            self.blacklist.insert_hold(req.ip, until);
            self.events.emit(RateLimitEvent::IpAutoBlocked {
                ip: req.ip,
                violations: entry.violations,
                block_until: until,
            });
        }
        Some(self.build_denial(GatewayError::IpLimit, req, None, headers))
    }

    fn check_account(&self, req: &CheckRequest, now: Instant) -> CheckOutcome {
        let (Some(user_id), Some(tier_name)) = (req.user_id.as_ref(), req.tier.as_ref()) else {
            return CheckOutcome::Allowed {
                headers: RateLimitHeaders::default(),
                guard: None,
            };
        };

        let Some(tier) = self.config.tiers.get(tier_name) else {
            // Unknown tier: admit without account-layer enforcement rather
            // than failing the request — configuration drift shouldn't take
            // the gateway down.
            return CheckOutcome::Allowed {
                headers: RateLimitHeaders::default(),
                guard: None,
            };
        };

        let mut account = self
            .accounts
            .entry(user_id.clone())
            .or_insert_with(|| AccountEntry::new(tier_name, tier, now));
        account.last_seen = now;

        // Concurrency is checked before the multiplier is computed, so a
        // caller denied here hasn't had its trust/suspicion score consulted
        // yet — headers advertise the tier's nominal per-minute rate.
        if account.in_flight >= account.max_concurrent {
            let headers = Self::account_deny_headers(tier.per_minute as f64, 1.0);
            drop(account);
            return CheckOutcome::Denied(self.build_denial(
                GatewayError::ConcurrencyLimit,
                req,
                Some(tier_name),
                headers,
            ));
        }

        let mut tracker = self
            .behavior
            .entry(user_id.clone())
            .or_insert_with(|| BehaviorTracker::new(now));
        let multiplier = tracker.multiplier(&self.config.adaptive);
        drop(tracker);

        // The behavior multiplier is applied as the token cost of this
        // request rather than as a separate gate: a trusted caller
        // (multiplier > 1) spends less than a full token per request, a
        // suspicious one spends more, and the bucket's own `rate`/`burst`
        // stay the single source of truth for the tier's nominal budget.
        let cost = if self.config.adaptive.enabled {
            1.0 / multiplier
        } else {
            1.0
        };
        if !account.minute_bucket.try_acquire_cost(now, cost) {
            let headers = Self::account_deny_headers(tier.per_minute as f64, multiplier);
            drop(account);
            return CheckOutcome::Denied(self.build_denial(
                GatewayError::AccountLimit,
                req,
                Some(tier_name),
                headers,
            ));
        }

        account.in_flight += 1;
        let limit = (tier.per_minute as f64 * multiplier).floor().max(0.0) as u64;
        let remaining = (tier.burst as u64).saturating_sub(account.in_flight as u64);
        let headers = RateLimitHeaders {
            limit,
            remaining,
            reset: Self::epoch_now() + 60,
            retry_after: None,
        };
        drop(account);

        self.metrics.allowed.fetch_add(1, Ordering::Relaxed);
        CheckOutcome::Allowed {
            headers,
            guard: Some(ConcurrencyGuard {
                accounts: Arc::clone(&self.accounts),
                key: user_id.clone(),
            }),
        }
    }

    /// Records the outcome of a completed request against the caller's
    /// behavior tracker. Call once per request, after the handler has
    /// produced a status code.
    pub fn record_outcome(&self, user_id: &str, status: u16) {
        let Some(success) = classify_status(status) else {
            return;
        };
        let now = self.clock.now();
        let mut tracker = self
            .behavior
            .entry(user_id.to_string())
            .or_insert_with(|| BehaviorTracker::new(now));
        if success {
            tracker.record_success(&self.config.adaptive, now);
        } else if let Some(level) = tracker.record_failure(&self.config.adaptive, now) {
            self.events.emit(RateLimitEvent::SuspiciousActivity {
                user_id: user_id.to_string(),
                suspicion_level: level,
            });
        }
    }

    /// Wall-clock epoch seconds, independent of the `Clock`/`Instant` used
    /// for bucket math — `X-RateLimit-Reset` is a timestamp a client can
    /// compare against its own clock, not a duration.
    fn epoch_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Deny headers for a token-bucket layer (endpoint budget or IP) given
    /// how long the caller would need to wait for its next token.
    /// `retry_after` is always at least 1 second.
    fn wait_headers(bucket: &TokenBucket, wait: Duration) -> RateLimitHeaders {
        let limit = bucket.burst().floor().max(0.0) as u64;
        let retry_after = (wait.as_secs_f64().ceil() as u64).max(1);
        RateLimitHeaders {
            limit,
            remaining: bucket.remaining(),
            reset: Self::epoch_now() + retry_after,
            retry_after: Some(retry_after),
        }
    }

    /// Deny headers for the account layer (`ConcurrencyLimit`/`AccountLimit`):
    /// both denials advertise the fixed 60-second minute window, with
    /// `limit` scaled by whatever behavior multiplier was in effect.
    fn account_deny_headers(per_minute: f64, multiplier: f64) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: (per_minute * multiplier).floor().max(0.0) as u64,
            remaining: 0,
            reset: Self::epoch_now() + 60,
            retry_after: Some(60),
        }
    }

    fn deny(
        &self,
        error: GatewayError,
        req: &CheckRequest,
        tier: Option<&str>,
        now: Instant,
    ) -> CheckOutcome {
        let _ = now;
        CheckOutcome::Denied(self.build_denial(error, req, tier, RateLimitHeaders::default()))
    }

    fn deny_with_message(
        &self,
        error: GatewayError,
        req: &CheckRequest,
        tier: Option<&str>,
        headers: RateLimitHeaders,
        custom_message: Option<String>,
    ) -> CheckOutcome {
        self.metrics.record_denial(&error);
        self.events.emit(RateLimitEvent::RateLimitExceeded {
            user_id: req.user_id.clone(),
            layer: error.layer_label(&req.path, tier),
        });
        CheckOutcome::Denied(Denial {
            error,
            headers,
            custom_message,
            request_id: None,
        })
    }

    fn build_denial(
        &self,
        error: GatewayError,
        req: &CheckRequest,
        tier: Option<&str>,
        headers: RateLimitHeaders,
    ) -> Denial {
        self.metrics.record_denial(&error);
        self.events.emit(RateLimitEvent::RateLimitExceeded {
            user_id: req.user_id.clone(),
            layer: error.layer_label(&req.path, tier),
        });
        Denial {
            error,
            headers,
            custom_message: None,
            request_id: None,
        }
    }

    /// Background sweep entry point: `DashMap::retain`'s per-shard locking
    /// already serializes against any in-flight `entry()`/`get_mut()` call
    /// on the same key, so no separate claim step is needed here.
    pub fn sweep_idle(&self) {
        let now = self.clock.now();
        let idle = self.config.idle_threshold;
        self.ip_entries.retain(|_, e| !e.is_idle(now, idle));
        self.accounts.retain(|_, e| !e.is_idle(now, idle));
        self.behavior.retain(|_, e| !e.is_idle(now, idle));
        self.blacklist.evict_expired(now);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;
    use crate::clock::TestClock;
    use crate::config::{AdaptiveConfig, EndpointBudgetConfig, IpConfig, ServerConfig, TierConfig};

    fn base_config() -> GatewayConfig {
        let mut tiers = HashMap::new();
        tiers.insert(
            "free".to_string(),
            TierConfig {
                per_minute: 60,
                per_hour: 1000,
                per_day: 10000,
                burst: 3,
                concurrent: 2,
            },
        );
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
            tiers,
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
        }
    }

    fn req(ip: u8, user_id: Option<&str>) -> CheckRequest {
        CheckRequest {
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, ip)),
            user_id: user_id.map(|s| s.to_string()),
            tier: user_id.map(|_| "free".to_string()),
            method: Method::GET,
            path: "/v1/balance/1".to_string(),
        }
    }

    #[test]
    fn anonymous_ip_bucket_drains_and_blocks() {
        let clock = Arc::new(TestClock::new());
        let engine = GatewayEngine::new(base_config(), clock.clone());
        let r = req(1, None);

        assert!(matches!(engine.check(&r), CheckOutcome::Allowed { .. }));
        assert!(matches!(engine.check(&r), CheckOutcome::Allowed { .. }));
        assert!(matches!(engine.check(&r), CheckOutcome::Denied(_)));
    }

    #[test]
    fn ip_auto_blocks_after_threshold_violations() {
        let clock = Arc::new(TestClock::new());
        let engine = GatewayEngine::new(base_config(), clock.clone());
        let r = req(2, None);

        // Drain the initial burst of 2.
        engine.check(&r);
        engine.check(&r);
        // 3 more denials reach auto_block_threshold == 3.
        for _ in 0..3 {
            engine.check(&r);
        }
        match engine.check(&r) {
            CheckOutcome::Denied(denial) => assert_eq!(denial.error, GatewayError::IpBlocked),
            other => panic!("expected IpBlocked, got {other:?}"),
        }
    }

    #[test]
    fn blocked_ip_self_releases_after_block_duration() {
        let clock = Arc::new(TestClock::new());
        let engine = GatewayEngine::new(base_config(), clock.clone());
        let r = req(3, None);

        for _ in 0..5 {
            engine.check(&r);
        }
        clock.advance(Duration::from_secs(61));
        assert!(matches!(engine.check(&r), CheckOutcome::Allowed { .. }));
    }

    #[test]
    fn concurrency_guard_decrements_in_flight_on_drop() {
        let clock = Arc::new(TestClock::new());
        let engine = GatewayEngine::new(base_config(), clock.clone());
        let r = req(4, Some("user-1"));

        let guard = match engine.check(&r) {
            CheckOutcome::Allowed { guard, .. } => guard,
            other => panic!("expected Allowed, got {other:?}"),
        };
        assert_eq!(engine.accounts.get("user-1").unwrap().in_flight, 1);
        drop(guard);
        assert_eq!(engine.accounts.get("user-1").unwrap().in_flight, 0);
    }

    #[test]
    fn account_concurrency_limit_denies_beyond_tier_cap() {
        let clock = Arc::new(TestClock::new());
        let engine = GatewayEngine::new(base_config(), clock.clone());
        let r = req(5, Some("user-2"));

        let _g1 = match engine.check(&r) {
            CheckOutcome::Allowed { guard, .. } => guard,
            other => panic!("expected Allowed, got {other:?}"),
        };
        let _g2 = match engine.check(&r) {
            CheckOutcome::Allowed { guard, .. } => guard,
            other => panic!("expected Allowed, got {other:?}"),
        };
        match engine.check(&r) {
            CheckOutcome::Denied(denial) => assert_eq!(denial.error, GatewayError::ConcurrencyLimit),
            other => panic!("expected ConcurrencyLimit, got {other:?}"),
        }
    }

    #[test]
    fn endpoint_budget_overrides_take_priority_over_ip_layer() {
        let clock = Arc::new(TestClock::new());
        let mut config = base_config();
        config.endpoints.insert(
            (Method::GET, "/v1/balance/1".to_string()),
            EndpointBudgetConfig {
                enabled: true,
                rps: 1.0,
                burst: 1.0,
                skip_ip_limit: true,
                custom_message: Some("slow down".to_string()),
            },
        );
        let engine = GatewayEngine::new(config, clock.clone());
        let r = req(6, None);

        assert!(matches!(engine.check(&r), CheckOutcome::Allowed { .. }));
        match engine.check(&r) {
            CheckOutcome::Denied(denial) => {
                assert_eq!(denial.error, GatewayError::EndpointLimit);
                assert_eq!(denial.custom_message.as_deref(), Some("slow down"));
            }
            other => panic!("expected EndpointLimit, got {other:?}"),
        }
    }

    #[test]
    fn sweep_idle_evicts_entries_past_idle_threshold() {
        let clock = Arc::new(TestClock::new());
        let engine = GatewayEngine::new(base_config(), clock.clone());
        engine.check(&req(7, None));
        assert_eq!(engine.ip_entries.len(), 1);

        clock.advance(Duration::from_secs(601));
        engine.sweep_idle();
        assert_eq!(engine.ip_entries.len(), 0);
    }

    #[test]
    fn endpoint_budget_deny_headers_reflect_wait_not_nominal_rate() {
        let clock = Arc::new(TestClock::new());
        let mut config = base_config();
        config.ip.enabled = false;
        config.endpoints.insert(
            (Method::GET, "/v1/balance/1".to_string()),
            EndpointBudgetConfig {
                enabled: true,
                rps: 2.0,
                burst: 1.0,
                skip_ip_limit: true,
                custom_message: None,
            },
        );
        let engine = GatewayEngine::new(config, clock);
        let r = req(8, None);

        assert!(matches!(engine.check(&r), CheckOutcome::Allowed { .. }));
        match engine.check(&r) {
            CheckOutcome::Denied(denial) => {
                // rate=2/s, burst=1: the next reservation needs 0.5s, well
                // under the tier's nominal per-minute rate a stale
                // rate-derived formula would have reported.
                assert_eq!(denial.headers.retry_after, Some(1));
                assert!(denial.headers.reset > 0);
            }
            other => panic!("expected EndpointLimit, got {other:?}"),
        }
    }

    #[test]
    fn whitelisted_ip_bypasses_account_layer_too() {
        let clock = Arc::new(TestClock::new());
        let mut config = base_config();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        config.ip.whitelist_ips.insert(ip);
        // A tier with zero concurrency would deny every account-layer
        // request if the whitelist bypass didn't short-circuit first.
        config.tiers.get_mut("free").unwrap().concurrent = 0;
        let engine = GatewayEngine::new(config, clock);
        let r = CheckRequest {
            ip,
            user_id: Some("whitelisted-user".to_string()),
            tier: Some("free".to_string()),
            method: Method::GET,
            path: "/v1/balance/1".to_string(),
        };

        for _ in 0..5 {
            match engine.check(&r) {
                CheckOutcome::Allowed { headers, guard } => {
                    assert_eq!(headers.limit, 0);
                    assert!(guard.is_none());
                }
                other => panic!("expected Allowed, got {other:?}"),
            }
        }
    }

    #[test]
    fn account_allow_headers_never_carry_retry_after() {
        let clock = Arc::new(TestClock::new());
        let engine = GatewayEngine::new(base_config(), clock);
        let r = req(9, Some("user-3"));

        match engine.check(&r) {
            CheckOutcome::Allowed { headers, .. } => assert_eq!(headers.retry_after, None),
            other => panic!("expected Allowed, got {other:?}"),
        }
    }
}

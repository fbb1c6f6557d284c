use std::net::IpAddr;
use std::time::Instant;

/// Structured events the engine emits, fire-and-forget.
#[derive(Debug, Clone)]
pub enum RateLimitEvent {
    RateLimitExceeded { user_id: Option<String>, layer: String },
    RateLimitBlacklist { ip: IpAddr, path: String },
    IpAutoBlocked { ip: IpAddr, violations: u32, block_until: Instant },
    SuspiciousActivity { user_id: String, suspicion_level: u32 },
}

/// One-way sink for limiter events. Implementations must not block request
/// admission — a dropped event is preferable to a blocked decision.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RateLimitEvent);
}

/// Default sink: logs every event through `tracing`. Never fails, never
/// blocks.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: RateLimitEvent) {
        match event {
            RateLimitEvent::RateLimitExceeded { user_id, layer } => {
                tracing::info!(user_id = ?user_id, layer = %layer, "rate_limit_exceeded");
            }
            RateLimitEvent::RateLimitBlacklist { ip, path } => {
                tracing::warn!(%ip, %path, "rate_limit_blacklist");
            }
            RateLimitEvent::IpAutoBlocked { ip, violations, block_until } => {
                tracing::warn!(%ip, violations, ?block_until, "ip_auto_blocked");
            }
            RateLimitEvent::SuspiciousActivity { user_id, suspicion_level } => {
                tracing::warn!(%user_id, suspicion_level, "suspicious_activity");
            }
        }
    }
}

/// A bounded, non-blocking channel sink — useful for tests that assert which
/// events fired, and for forwarding events to an external audit sink without
/// risking back-pressure on the request path.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: tokio::sync::mpsc::Sender<RateLimitEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<RateLimitEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: RateLimitEvent) {
        // try_send, never await: a full channel drops the event rather than
        // stalling the caller.
        if self.tx.try_send(event).is_err() {
            tracing::debug!("event sink channel full or closed, dropping event");
        }
    }
}

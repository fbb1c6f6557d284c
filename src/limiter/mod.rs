mod account_entry;
mod behavior;
pub mod engine;
mod events;
mod ip_entry;
pub mod janitor;
mod membership;
mod token_bucket;

pub use account_entry::AccountEntry;
pub use behavior::{classify_status, BehaviorTracker};
pub use engine::{CheckOutcome, ConcurrencyGuard, GatewayEngine};
pub use events::{ChannelEventSink, EventSink, RateLimitEvent, TracingEventSink};
pub use ip_entry::IpEntry;
pub use membership::{Blacklist, MembershipIndex};
pub use token_bucket::{Reservation, TokenBucket};

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ipnet::IpNet;

/// Immutable whitelist/blacklist exact-match sets and CIDR ranges, built once
/// at startup. Runtime additions flow only through the `blacklist` hold map,
/// never through this index.
#[derive(Debug)]
pub struct MembershipIndex {
    whitelist_ips: HashSet<IpAddr>,
    whitelist_cidrs: Vec<IpNet>,
    blacklist_cidrs: Vec<IpNet>,
}

/// Time-bounded blacklist holds: manual blacklist entries (seeded with a
/// year-long hold) and auto-block holds live here.
pub struct Blacklist {
    holds: DashMap<IpAddr, Instant>,
}

/// A year is long enough to behave as "permanent" for the lifetime of a
/// process without needing a separate always-blocked representation.
const PERMANENT_HOLD: Duration = Duration::from_secs(365 * 24 * 3600);

impl MembershipIndex {
    pub fn new(
        whitelist_ips: HashSet<IpAddr>,
        whitelist_cidrs: Vec<IpNet>,
        blacklist_cidrs: Vec<IpNet>,
    ) -> Self {
        Self {
            whitelist_ips,
            whitelist_cidrs,
            blacklist_cidrs,
        }
    }

    /// Exact match first, then a linear CIDR scan. Order does not affect
    /// correctness since membership is a set union.
    pub fn is_whitelisted(&self, ip: IpAddr) -> bool {
        self.whitelist_ips.contains(&ip) || self.whitelist_cidrs.iter().any(|net| net.contains(&ip))
    }

    pub fn matches_blacklist_cidr(&self, ip: IpAddr) -> bool {
        self.blacklist_cidrs.iter().any(|net| net.contains(&ip))
    }
}

impl Blacklist {
    pub fn new(blacklist_ips: &HashSet<IpAddr>, now: Instant) -> Self {
        let holds = DashMap::new();
        for ip in blacklist_ips {
            holds.insert(*ip, now + PERMANENT_HOLD);
        }
        Self { holds }
    }

    /// Checks the hold map: present and unexpired => blocked. Present and
    /// expired => removed, falls through to the CIDR scan. Absent => scan.
    pub fn is_blacklisted(&self, ip: IpAddr, membership: &MembershipIndex, now: Instant) -> bool {
        if let Some(entry) = self.holds.get(&ip) {
            if now < *entry {
                return true;
            }
            drop(entry);
            self.holds.remove(&ip);
        }
        membership.matches_blacklist_cidr(ip)
    }

    pub fn insert_hold(&self, ip: IpAddr, until: Instant) {
        self.holds.insert(ip, until);
    }

    /// Janitor sweep: drop holds that have already expired.
    pub fn evict_expired(&self, now: Instant) {
        self.holds.retain(|_, unblock_at| *unblock_at > now);
    }

    pub fn len(&self) -> usize {
        self.holds.len()
    }
}

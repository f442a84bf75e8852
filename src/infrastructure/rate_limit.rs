//! Per-peer rate limiting.
//!
//! Two layers: a token bucket applied to every message on a connection,
//! and a slower multi-tier limiter for `!orderbook` requests whose
//! backoff escalates with repeated violations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// What to do with a message that just arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitAction {
    Allow,
    /// Drop or queue; the peer is over its sustained rate.
    Delay,
    /// Too many violations; close the connection.
    Disconnect,
}

/// Token bucket: burst up to capacity, then a steady refill rate.
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self { capacity, tokens: capacity, refill_rate, last_refill: Instant::now() }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    pub fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn available_tokens(&mut self) -> f64 {
        self.refill();
        self.tokens
    }
}

struct PeerBucket {
    bucket: TokenBucket,
    violations: u32,
}

/// Per-peer message limiter with a disconnect threshold.
pub struct MessageLimiter {
    peers: Arc<Mutex<HashMap<String, PeerBucket>>>,
    capacity: f64,
    refill_rate: f64,
    disconnect_threshold: Option<u32>,
}

impl MessageLimiter {
    pub fn new(refill_rate: f64, capacity: f64, disconnect_threshold: Option<u32>) -> Self {
        Self { peers: Arc::new(Mutex::new(HashMap::new())), capacity, refill_rate, disconnect_threshold }
    }

    pub fn check(&self, peer: &str) -> RateLimitAction {
        let mut peers = self.peers.lock().unwrap_or_else(|err| err.into_inner());
        let entry = peers
            .entry(peer.to_string())
            .or_insert_with(|| PeerBucket { bucket: TokenBucket::new(self.capacity, self.refill_rate), violations: 0 });
        if entry.bucket.try_consume() {
            return RateLimitAction::Allow;
        }
        entry.violations += 1;
        match self.disconnect_threshold {
            Some(threshold) if entry.violations >= threshold => RateLimitAction::Disconnect,
            _ => RateLimitAction::Delay,
        }
    }

    pub fn violation_count(&self, peer: &str) -> u32 {
        self.peers.lock().unwrap_or_else(|err| err.into_inner()).get(peer).map_or(0, |p| p.violations)
    }

    pub fn remove_peer(&self, peer: &str) {
        self.peers.lock().unwrap_or_else(|err| err.into_inner()).remove(peer);
    }

    /// Drop state for peers idle longer than `max_age`; call from a sweep
    /// task so the map stays bounded.
    pub fn cleanup_old_entries(&self, max_age: Duration) {
        let mut peers = self.peers.lock().unwrap_or_else(|err| err.into_inner());
        let cutoff = Instant::now() - max_age;
        peers.retain(|_, entry| entry.bucket.last_refill > cutoff);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap_or_else(|err| err.into_inner()).len()
    }
}

/// Escalating backoff tiers for `!orderbook` requests.
const TIER_NORMAL_SECS: u64 = 10;
const TIER_MODERATE_SECS: u64 = 60;
const TIER_SEVERE_SECS: u64 = 300;
const TIER_BAN_SECS: u64 = 3600;
const MODERATE_THRESHOLD: u32 = 10;
const SEVERE_THRESHOLD: u32 = 50;
const BAN_THRESHOLD: u32 = 100;

#[derive(Clone, Copy, Debug, Default)]
struct OrderbookPeerState {
    violations: u32,
    next_allowed: u64,
    last_violation: u64,
}

/// Orderbook-specific limiter. Time is injected (seconds) so behavior is
/// testable without sleeping through a one-hour ban.
#[derive(Default)]
pub struct OrderbookLimiter {
    states: Mutex<HashMap<String, OrderbookPeerState>>,
}

impl OrderbookLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn backoff_for(violations: u32) -> u64 {
        if violations > BAN_THRESHOLD {
            TIER_BAN_SECS
        } else if violations > SEVERE_THRESHOLD {
            TIER_SEVERE_SECS
        } else if violations > MODERATE_THRESHOLD {
            TIER_MODERATE_SECS
        } else {
            TIER_NORMAL_SECS
        }
    }

    /// Returns true when the request is allowed.
    pub fn check(&self, peer: &str, now: u64) -> bool {
        let mut states = self.states.lock().unwrap_or_else(|err| err.into_inner());
        let state = states.entry(peer.to_string()).or_default();

        // Violation counters age out after the ban interval.
        if state.violations > 0 && now.saturating_sub(state.last_violation) >= TIER_BAN_SECS {
            state.violations = 0;
        }

        if now < state.next_allowed {
            state.violations += 1;
            state.last_violation = now;
            state.next_allowed = now + Self::backoff_for(state.violations);
            false
        } else {
            state.next_allowed = now + TIER_NORMAL_SECS;
            true
        }
    }

    pub fn violation_count(&self, peer: &str) -> u32 {
        self.states.lock().unwrap_or_else(|err| err.into_inner()).get(peer).map_or(0, |s| s.violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn token_bucket_burst_then_deny() {
        let mut bucket = TokenBucket::new(5.0, 1.0);
        for _ in 0..5 {
            assert!(bucket.try_consume());
        }
        assert!(!bucket.try_consume());
    }

    #[test]
    fn token_bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(2.0, 10.0);
        assert!(bucket.try_consume());
        assert!(bucket.try_consume());
        assert!(!bucket.try_consume());

        thread::sleep(Duration::from_millis(150));
        assert!(bucket.try_consume());
        assert!(!bucket.try_consume());
    }

    #[test]
    fn limiter_is_per_peer() {
        let limiter = MessageLimiter::new(1.0, 2.0, None);
        assert_eq!(limiter.check("peer_a"), RateLimitAction::Allow);
        assert_eq!(limiter.check("peer_a"), RateLimitAction::Allow);
        assert_eq!(limiter.check("peer_a"), RateLimitAction::Delay);

        assert_eq!(limiter.check("peer_b"), RateLimitAction::Allow);
        assert_eq!(limiter.check("peer_b"), RateLimitAction::Allow);
        assert_eq!(limiter.check("peer_b"), RateLimitAction::Delay);
    }

    #[test]
    fn disconnect_after_threshold() {
        let limiter = MessageLimiter::new(1.0, 2.0, Some(3));
        limiter.check("peer");
        limiter.check("peer");
        assert_eq!(limiter.check("peer"), RateLimitAction::Delay);
        assert_eq!(limiter.check("peer"), RateLimitAction::Delay);
        assert_eq!(limiter.check("peer"), RateLimitAction::Disconnect);
        assert_eq!(limiter.violation_count("peer"), 3);
    }

    #[test]
    fn remove_peer_clears_state() {
        let limiter = MessageLimiter::new(1.0, 1.0, None);
        limiter.check("peer");
        limiter.check("peer");
        assert!(limiter.violation_count("peer") > 0);
        limiter.remove_peer("peer");
        assert_eq!(limiter.violation_count("peer"), 0);
        assert_eq!(limiter.check("peer"), RateLimitAction::Allow);
    }

    #[test]
    fn orderbook_tiers_escalate() {
        let limiter = OrderbookLimiter::new();
        assert!(limiter.check("peer", 0));
        // hammering inside the 10 s window piles up violations
        for second in 1..=11 {
            assert!(!limiter.check("peer", second));
        }
        assert_eq!(limiter.violation_count("peer"), 11);
        // now in the moderate tier: 60 s backoff from the last violation
        assert!(!limiter.check("peer", 12 + TIER_NORMAL_SECS));
        assert!(limiter.check("peer", 12 + TIER_MODERATE_SECS + TIER_MODERATE_SECS));
    }

    #[test]
    fn orderbook_counters_reset_after_ban_interval() {
        let limiter = OrderbookLimiter::new();
        assert!(limiter.check("peer", 0));
        for second in 1..=5 {
            assert!(!limiter.check("peer", second));
        }
        assert_eq!(limiter.violation_count("peer"), 5);
        // an hour later the slate is clean
        assert!(limiter.check("peer", 5 + TIER_BAN_SECS));
        assert_eq!(limiter.violation_count("peer"), 0);
    }

    #[test]
    fn orderbook_respects_normal_interval() {
        let limiter = OrderbookLimiter::new();
        assert!(limiter.check("peer", 100));
        assert!(!limiter.check("peer", 105));
        assert!(limiter.check("peer", 200));
    }
}

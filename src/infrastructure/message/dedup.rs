//! Multi-channel deduplication.
//!
//! A process attached to N directories hears every broadcast N times.
//! The first arrival wins; duplicates with the same fingerprint inside
//! the window are dropped silently. Broadcasts are fingerprinted by
//! `(from_nick, command, first_arg)`, awaited responses by
//! `(from_nick, command)`.

use crate::foundation::{Nick, DEDUP_WINDOW_SECS};
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
pub struct DedupWindow<K: Eq + Hash> {
    window_secs: u64,
    seen: HashMap<K, u64>,
}

impl<K: Eq + Hash> DedupWindow<K> {
    pub fn new(window_secs: u64) -> Self {
        Self { window_secs, seen: HashMap::new() }
    }

    /// Record an observation. Returns true when this is the first sight
    /// of the fingerprint within the window.
    pub fn observe(&mut self, key: K, now: u64) -> bool {
        self.purge(now);
        match self.seen.get(&key) {
            Some(&first) if now.saturating_sub(first) < self.window_secs => false,
            _ => {
                self.seen.insert(key, now);
                true
            }
        }
    }

    pub fn purge(&mut self, now: u64) {
        let window = self.window_secs;
        self.seen.retain(|_, &mut first| now.saturating_sub(first) < window);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Fingerprint for broadcast traffic.
pub type BroadcastFingerprint = (Nick, String, String);
/// Fingerprint for awaited responses.
pub type ResponseFingerprint = (Nick, String);

pub fn broadcast_window() -> DedupWindow<BroadcastFingerprint> {
    DedupWindow::new(DEDUP_WINDOW_SECS)
}

pub fn response_window() -> DedupWindow<ResponseFingerprint> {
    DedupWindow::new(DEDUP_WINDOW_SECS)
}

/// Fingerprint a broadcast by sender, command and first argument.
pub fn broadcast_fingerprint(from: &Nick, command: &str, args: &str) -> BroadcastFingerprint {
    let first_arg = args.split(' ').next().unwrap_or("").to_string();
    (from.clone(), command.to_string(), first_arg)
}

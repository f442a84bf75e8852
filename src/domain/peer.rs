//! Peer table and multi-directory presence tracking.

use crate::foundation::{CoinjoinError, Nick, Result, NOT_SERVING_ONION};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    #[default]
    Pending,
    Handshaked,
    Disconnected,
}

/// Network location of a peer: an onion `host:port` it serves on, or a
/// marker that it only makes outbound connections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerLocation {
    Onion { host: String, port: u16 },
    NotServing,
}

impl fmt::Display for PeerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerLocation::Onion { host, port } => write!(f, "{host}:{port}"),
            PeerLocation::NotServing => write!(f, "{NOT_SERVING_ONION}"),
        }
    }
}

impl FromStr for PeerLocation {
    type Err = CoinjoinError;

    fn from_str(s: &str) -> Result<Self> {
        if s == NOT_SERVING_ONION {
            return Ok(PeerLocation::NotServing);
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CoinjoinError::ParseError(format!("peer location missing port: {s}")))?;
        let port: u16 = port.parse().map_err(|_| CoinjoinError::ParseError(format!("peer location port: {s}")))?;
        if host.is_empty() {
            return Err(CoinjoinError::ParseError("peer location has empty host".into()));
        }
        Ok(PeerLocation::Onion { host: host.to_string(), port })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Peer {
    pub nick: Nick,
    pub location: PeerLocation,
    pub features: BTreeSet<String>,
    pub state: HandshakeState,
    pub last_seen: u64,
}

impl Peer {
    pub fn supports(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}

/// Peer table keyed by nick. Mutated only by the network ingress task;
/// reads during a run take snapshots.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<Nick, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, nick: Nick, location: PeerLocation, features: BTreeSet<String>, now: u64) -> &mut Peer {
        let peer = self.peers.entry(nick.clone()).or_insert_with(|| Peer {
            nick,
            location: location.clone(),
            features: features.clone(),
            state: HandshakeState::Pending,
            last_seen: now,
        });
        peer.location = location;
        peer.features = features;
        peer.last_seen = now;
        peer
    }

    pub fn mark_handshaked(&mut self, nick: &Nick, now: u64) {
        if let Some(peer) = self.peers.get_mut(nick) {
            peer.state = HandshakeState::Handshaked;
            peer.last_seen = now;
        }
    }

    pub fn mark_disconnected(&mut self, nick: &Nick) {
        if let Some(peer) = self.peers.get_mut(nick) {
            peer.state = HandshakeState::Disconnected;
        }
    }

    pub fn remove(&mut self, nick: &Nick) -> Option<Peer> {
        self.peers.remove(nick)
    }

    pub fn get(&self, nick: &Nick) -> Option<&Peer> {
        self.peers.get(nick)
    }

    pub fn is_connected(&self, nick: &Nick) -> bool {
        matches!(self.peers.get(nick).map(|p| p.state), Some(HandshakeState::Handshaked))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }
}

/// Presence of nicks across multiple directory connections.
///
/// A nick is alive while at least one directory still reports it; it is
/// only treated as gone once every attached directory agrees. This stops a
/// flaky single directory from tearing down sessions that are healthy on
/// the others.
#[derive(Debug, Default)]
pub struct DirectoryPresence {
    // nick -> directory hostid -> currently present
    active: HashMap<Nick, HashMap<String, bool>>,
}

impl DirectoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a presence update. Returns true when this update made the
    /// nick gone from every directory (the caller tears down state).
    pub fn update(&mut self, nick: &Nick, directory: &str, present: bool) -> bool {
        let entry = self.active.entry(nick.clone()).or_default();
        let old = entry.insert(directory.to_string(), present);

        if !present && old == Some(true) && !self.is_active(nick) {
            log::info!("nick {nick} has left all directories");
            self.active.remove(nick);
            return true;
        }
        if present && old == Some(false) {
            log::debug!("nick {nick} returned to directory {directory}");
        }
        false
    }

    pub fn is_active(&self, nick: &Nick) -> bool {
        self.active.get(nick).is_some_and(|dirs| dirs.values().any(|&present| present))
    }

    pub fn active_directories(&self, nick: &Nick) -> Vec<String> {
        self.active
            .get(nick)
            .map(|dirs| dirs.iter().filter(|(_, &present)| present).map(|(d, _)| d.clone()).collect())
            .unwrap_or_default()
    }

    pub fn active_nicks(&self) -> BTreeSet<Nick> {
        self.active.keys().filter(|nick| self.is_active(nick)).cloned().collect()
    }

    /// Drop a directory entirely (its connection died). Returns the nicks
    /// that are no longer reachable anywhere afterwards.
    pub fn remove_directory(&mut self, directory: &str) -> Vec<Nick> {
        let mut gone = Vec::new();
        let nicks: Vec<Nick> = self.active.keys().cloned().collect();
        for nick in nicks {
            let removed = match self.active.get_mut(&nick) {
                Some(dirs) => dirs.remove(directory).is_some(),
                None => continue,
            };
            if !removed {
                continue;
            }
            let now_gone = self.active.get(&nick).map_or(true, |dirs| dirs.is_empty() || !dirs.values().any(|&p| p));
            if now_gone {
                self.active.remove(&nick);
                gone.push(nick);
            }
        }
        if !gone.is_empty() {
            log::info!("after removing directory {directory}, {} nicks are gone", gone.len());
        }
        gone
    }

    /// Reconcile with a full peerlist from one directory: everything in
    /// the list is present there, everything else we track is gone there.
    /// Returns nicks that became gone everywhere.
    pub fn sync_with_peerlist(&mut self, directory: &str, listed: &BTreeSet<Nick>) -> Vec<Nick> {
        for nick in listed {
            self.update(nick, directory, true);
        }
        let tracked: Vec<Nick> = self.active.keys().cloned().collect();
        let mut gone = Vec::new();
        for nick in tracked {
            let knows = self.active.get(&nick).is_some_and(|dirs| dirs.contains_key(directory));
            if knows && !listed.contains(&nick) && self.update(&nick, directory, false) {
                gone.push(nick);
            }
        }
        gone
    }
}

/// Peerlist entry grammar: `nick;location[;D][;F:feat1+feat2]`. Features
/// are `+`-separated on purpose; the comma separates whole entries.
pub fn format_peerlist_entry(nick: &Nick, location: &PeerLocation, disconnected: bool, features: &BTreeSet<String>) -> String {
    let mut entry = format!("{nick};{location}");
    if disconnected {
        entry.push_str(";D");
    }
    if !features.is_empty() {
        let joined: Vec<&str> = features.iter().map(String::as_str).collect();
        entry.push_str(";F:");
        entry.push_str(&joined.join("+"));
    }
    entry
}

pub fn parse_peerlist_entry(entry: &str) -> Result<(Nick, PeerLocation, bool, BTreeSet<String>)> {
    let mut parts = entry.split(';');
    let nick = parts.next().filter(|s| !s.is_empty());
    let location = parts.next();
    let (Some(nick), Some(location)) = (nick, location) else {
        return Err(CoinjoinError::ParseError(format!("peerlist entry missing fields: {entry}")));
    };
    let location: PeerLocation = location.parse()?;

    let mut disconnected = false;
    let mut features = BTreeSet::new();
    for extra in parts {
        if extra == "D" {
            disconnected = true;
        } else if let Some(feats) = extra.strip_prefix("F:") {
            features = feats.split('+').filter(|f| !f.is_empty()).map(str::to_string).collect();
        } else {
            return Err(CoinjoinError::ParseError(format!("unknown peerlist entry field: {extra}")));
        }
    }
    Ok((Nick::new(nick), location, disconnected, features))
}

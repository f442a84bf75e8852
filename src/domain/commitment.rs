//! Commitment bookkeeping.
//!
//! Takers track which (utxo, index) pairs they have burned so a retry
//! never reuses a blacklisted commitment; makers keep a global blacklist
//! of every commitment they have seen consumed, fed locally and via
//! `!hp2` broadcasts from the rest of the network.

use crate::foundation::{Hash32, Outpoint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentRecord {
    #[serde(with = "hex_hash")]
    pub commitment: Hash32,
    pub nums_index: u8,
    pub utxo: Outpoint,
    pub first_used_at: u64,
}

mod hex_hash {
    use super::Hash32;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash32, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

/// Taker-side ledger of consumed commitments.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UsedCommitments {
    records: Vec<CommitmentRecord>,
}

impl UsedCommitments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: CommitmentRecord) {
        if !self.contains(&record.commitment) {
            self.records.push(record);
        }
    }

    pub fn contains(&self, commitment: &Hash32) -> bool {
        self.records.iter().any(|r| &r.commitment == commitment)
    }

    pub fn used_indices(&self, utxo: &Outpoint) -> BTreeSet<u8> {
        self.records.iter().filter(|r| &r.utxo == utxo).map(|r| r.nums_index).collect()
    }

    /// Lowest unused NUMS index for this UTXO, with `max_tries` indices
    /// available in total. Index 0 is the preferred first use; each
    /// burned commitment moves the taker one index up until the retry
    /// budget is exhausted.
    pub fn next_index(&self, utxo: &Outpoint, max_tries: u8) -> Option<u8> {
        let used = self.used_indices(utxo);
        (0..max_tries).find(|index| !used.contains(index))
    }

    pub fn records(&self) -> &[CommitmentRecord] {
        &self.records
    }
}

/// Maker-side blacklist: any commitment seen once is dead forever.
#[derive(Clone, Debug, Default)]
pub struct CommitmentBlacklist {
    entries: HashSet<Hash32>,
}

impl CommitmentBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = Hash32>) -> Self {
        Self { entries: entries.into_iter().collect() }
    }

    /// Returns true when the commitment was fresh (now consumed).
    pub fn insert(&mut self, commitment: Hash32) -> bool {
        self.entries.insert(commitment)
    }

    pub fn contains(&self, commitment: &Hash32) -> bool {
        self.entries.contains(commitment)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hash32> {
        self.entries.iter()
    }
}

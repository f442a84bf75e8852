//! The offer table: everything makers have broadcast that is still live.

use crate::domain::bond::BondProof;
use crate::domain::offer::Offer;
use crate::domain::peer::PeerRegistry;
use crate::foundation::{Nick, DEFAULT_MAX_OFFER_AGE_SECS};
use std::collections::HashMap;

/// Single-writer table: the network ingress task inserts, everyone else
/// reads snapshots. At most one offer per `(maker, order_id)`; later
/// broadcasts replace earlier ones only when strictly newer.
#[derive(Debug)]
pub struct Orderbook {
    offers: HashMap<(Nick, u64), Offer>,
    bonds: HashMap<Nick, BondProof>,
    max_offer_age: u64,
}

impl Default for Orderbook {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OFFER_AGE_SECS)
    }
}

impl Orderbook {
    pub fn new(max_offer_age: u64) -> Self {
        Self { offers: HashMap::new(), bonds: HashMap::new(), max_offer_age }
    }

    /// Insert or replace. Returns false when an existing offer with the
    /// same key was at least as fresh and the insert was dropped.
    pub fn insert(&mut self, offer: Offer) -> bool {
        let key = (offer.maker.clone(), offer.order_id);
        match self.offers.get(&key) {
            Some(existing) if offer.received_at <= existing.received_at => {
                log::debug!("dropping stale duplicate offer {}:{}", key.0, key.1);
                false
            }
            _ => {
                self.offers.insert(key, offer);
                true
            }
        }
    }

    /// Attach a `!tbond` advertisement to a maker. The proof is validated
    /// by the caller before it lands here.
    pub fn insert_bond(&mut self, maker: Nick, proof: BondProof) {
        self.bonds.insert(maker, proof);
    }

    pub fn bond_for(&self, maker: &Nick) -> Option<&BondProof> {
        self.bonds.get(maker)
    }

    pub fn remove_maker(&mut self, maker: &Nick) {
        self.offers.retain(|(nick, _), _| nick != maker);
        self.bonds.remove(maker);
    }

    pub fn purge_stale(&mut self, now: u64) {
        let max_age = self.max_offer_age;
        self.offers.retain(|_, offer| now.saturating_sub(offer.received_at) <= max_age);
    }

    /// Offers eligible for selection: fresh, from connected makers, with
    /// any advertised bond attached.
    pub fn snapshot(&mut self, now: u64, registry: &PeerRegistry) -> Vec<Offer> {
        self.purge_stale(now);
        self.offers
            .values()
            .filter(|offer| registry.is_connected(&offer.maker))
            .cloned()
            .map(|mut offer| {
                offer.bond = self.bonds.get(&offer.maker).cloned();
                offer
            })
            .collect()
    }

    /// All live offers regardless of connection state, for observability.
    pub fn all_offers(&self) -> Vec<&Offer> {
        self.offers.values().collect()
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

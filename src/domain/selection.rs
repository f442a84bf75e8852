//! Maker selection: filter, dedupe, then draw N counterparties.
//!
//! Probability is per maker identity, never per offer. The dedupe step
//! collapses each maker to its single cheapest offer first, so flooding
//! the book with orders buys a maker nothing.

use crate::domain::bond::BondProof;
use crate::domain::offer::{Offer, OfferKind};
use crate::foundation::{CoinjoinError, Nick, Result};
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// How the taker picks counterparties from the deduplicated pool.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SelectionPolicy {
    /// Lowest effective fee first; ties broken by lower order id.
    Cheapest,
    /// Probability proportional to `exp(-alpha * fee)`.
    Weighted { alpha: f64 },
    /// Uniform over the pool.
    Random,
    /// Default: most slots drawn by bond weight, the remainder uniformly.
    /// `bond_numerator` sets the split as a fraction of 8 (7 by default),
    /// exposed as a tunable for research.
    FidelityBondWeighted { bond_numerator: u8 },
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy::FidelityBondWeighted { bond_numerator: 7 }
    }
}

/// Pluggable bond scoring. Zero means "no weight"; makers without a valid
/// bond always score zero.
pub trait BondScorer: Send + Sync {
    fn score(&self, proof: &BondProof, current_height: u32) -> f64;
}

/// Scores every bond equally; useful default when no economics model is
/// loaded.
pub struct FlatBondScorer;

impl BondScorer for FlatBondScorer {
    fn score(&self, _proof: &BondProof, _current_height: u32) -> f64 {
        1.0
    }
}

#[derive(Clone, Debug, Default)]
pub struct OfferQuery {
    pub amount: u64,
    /// Absolute ceiling on the effective fee the taker will pay one maker.
    pub max_fee: Option<i128>,
    /// Restrict to one offer kind, when the taker cares.
    pub kind: Option<OfferKind>,
    /// Nicks never to pick: failed makers from this run plus the
    /// operator's own maker nick from the state file.
    pub ignored: HashSet<Nick>,
}

/// Phase 1: drop offers that cannot serve this request.
pub fn filter_offers(offers: Vec<Offer>, query: &OfferQuery) -> Vec<Offer> {
    offers
        .into_iter()
        .filter(|offer| offer.brackets(query.amount))
        .filter(|offer| query.max_fee.map_or(true, |ceiling| offer.effective_fee(query.amount) <= ceiling))
        .filter(|offer| query.kind.map_or(true, |kind| offer.kind == kind))
        .filter(|offer| !query.ignored.contains(&offer.maker))
        .collect()
}

/// Phase 2: one offer per maker, keeping the cheapest (ties to the lower
/// order id).
pub fn dedupe_cheapest(offers: Vec<Offer>, amount: u64) -> Vec<Offer> {
    let mut best: HashMap<Nick, Offer> = HashMap::new();
    for offer in offers {
        match best.get(&offer.maker) {
            Some(current)
                if (current.effective_fee(amount), current.order_id)
                    <= (offer.effective_fee(amount), offer.order_id) => {}
            _ => {
                best.insert(offer.maker.clone(), offer);
            }
        }
    }
    let mut pool: Vec<Offer> = best.into_values().collect();
    // deterministic order for downstream algorithms
    pool.sort_by(|a, b| (a.effective_fee(amount), a.order_id, &a.maker).cmp(&(b.effective_fee(amount), b.order_id, &b.maker)));
    pool
}

/// Phase 3: select `n` distinct makers from a deduplicated pool.
pub fn select_makers<R: Rng>(
    pool: Vec<Offer>,
    amount: u64,
    n: usize,
    policy: SelectionPolicy,
    scorer: &dyn BondScorer,
    current_height: u32,
    rng: &mut R,
) -> Result<Vec<Offer>> {
    if pool.len() < n {
        return Err(CoinjoinError::InsufficientMakers { needed: n, available: pool.len() });
    }

    match policy {
        SelectionPolicy::Cheapest => Ok(pool.into_iter().take(n).collect()),
        SelectionPolicy::Random => Ok(draw_uniform(pool, n, rng)),
        SelectionPolicy::Weighted { alpha } => {
            let weights: Vec<f64> =
                pool.iter().map(|offer| (-alpha * offer.effective_fee(amount) as f64).exp()).collect();
            Ok(draw_weighted_without_replacement(pool, weights, n, rng))
        }
        SelectionPolicy::FidelityBondWeighted { bond_numerator } => {
            let bond_slots = (n * usize::from(bond_numerator)) / 8;
            let weights: Vec<f64> = pool
                .iter()
                .map(|offer| offer.bond.as_ref().map_or(0.0, |proof| scorer.score(proof, current_height).max(0.0)))
                .collect();

            let mut selected = draw_weighted_without_replacement_indexed(&pool, &weights, bond_slots, rng);
            let remaining: Vec<Offer> = pool
                .into_iter()
                .filter(|offer| !selected.iter().any(|s| s.maker == offer.maker))
                .collect();
            let uniform_slots = n - selected.len();
            selected.extend(draw_uniform(remaining, uniform_slots, rng));
            Ok(selected)
        }
    }
}

fn draw_uniform<R: Rng>(mut pool: Vec<Offer>, n: usize, rng: &mut R) -> Vec<Offer> {
    let mut selected = Vec::with_capacity(n);
    for _ in 0..n.min(pool.len()) {
        let index = rng.gen_range(0..pool.len());
        selected.push(pool.swap_remove(index));
    }
    selected
}

fn draw_weighted_without_replacement<R: Rng>(pool: Vec<Offer>, weights: Vec<f64>, n: usize, rng: &mut R) -> Vec<Offer> {
    let mut out = draw_weighted_without_replacement_indexed(&pool, &weights, n, rng);
    if out.len() < n {
        let remaining: Vec<Offer> =
            pool.into_iter().filter(|offer| !out.iter().any(|s| s.maker == offer.maker)).collect();
        out.extend(draw_uniform(remaining, n - out.len(), rng));
    }
    out
}

/// Draw up to `n` offers with probability proportional to weight, without
/// replacement. Zero-weight entries are never drawn; the caller tops up
/// from the uniform pool when the weighted pool runs dry.
fn draw_weighted_without_replacement_indexed<R: Rng>(
    pool: &[Offer],
    weights: &[f64],
    n: usize,
    rng: &mut R,
) -> Vec<Offer> {
    let mut entries: Vec<(usize, f64)> =
        weights.iter().copied().enumerate().filter(|&(_, w)| w > 0.0 && w.is_finite()).collect();
    let mut selected = Vec::with_capacity(n);
    while selected.len() < n && !entries.is_empty() {
        let total: f64 = entries.iter().map(|&(_, w)| w).sum();
        let mut target = rng.gen_range(0.0..total);
        let mut picked = entries.len() - 1;
        for (slot, &(_, weight)) in entries.iter().enumerate() {
            if target < weight {
                picked = slot;
                break;
            }
            target -= weight;
        }
        let (index, _) = entries.swap_remove(picked);
        selected.push(pool[index].clone());
    }
    selected
}

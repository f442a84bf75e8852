//! Distribution checks for the maker selection algorithms.

use coinjoin_core::domain::bond::BondProof;
use coinjoin_core::domain::offer::{CjFee, Offer, OfferKind};
use coinjoin_core::domain::selection::{dedupe_cheapest, select_makers, BondScorer, SelectionPolicy};
use coinjoin_core::foundation::{Nick, Outpoint, Txid};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;

fn offer(maker: &str, oid: u64, fee: u64) -> Offer {
    Offer {
        maker: Nick::new(maker),
        order_id: oid,
        kind: OfferKind::Absolute,
        min_size: 1000,
        max_size: 1_000_000_000,
        txfee_contribution: 0,
        cjfee: CjFee::Absolute(fee),
        bond: None,
        received_at: 0,
    }
}

fn with_bond(mut offer: Offer, seed: u8, locktime: u32) -> Offer {
    let key = secp256k1::SecretKey::from_slice(&[seed; 32]).unwrap();
    offer.bond = Some(
        BondProof::create(
            &key,
            &key,
            &offer.maker,
            &Nick::new("J5takerOOOOOOOOO"),
            500,
            Outpoint::new(Txid::new([seed; 32]), 0),
            locktime,
        )
        .unwrap(),
    );
    offer
}

/// Bond scores configured per locktime; the fixture encodes score in the
/// bond's locktime field.
struct LocktimeScore;

impl BondScorer for LocktimeScore {
    fn score(&self, proof: &BondProof, _height: u32) -> f64 {
        f64::from(proof.locktime)
    }
}

/// Ten makers, three bonded (scores 100/40/10). With n=4 the bond
/// distribution fills 3 slots and one is uniform over the remaining 7.
#[test]
fn bond_weighted_split_favors_bonds_and_leaves_one_uniform_slot() {
    const DRAWS: usize = 100_000;
    let mut pool: Vec<Offer> = (0..10).map(|i| offer(&format!("m{i}"), 0, 100)).collect();
    pool[0] = with_bond(pool[0].clone(), 10, 100);
    pool[1] = with_bond(pool[1].clone(), 11, 40);
    pool[2] = with_bond(pool[2].clone(), 12, 10);

    let mut rng = StdRng::seed_from_u64(0xb04d);
    let mut hits: HashMap<String, usize> = HashMap::new();
    for _ in 0..DRAWS {
        let picked = select_makers(
            pool.clone(),
            500_000,
            4,
            SelectionPolicy::FidelityBondWeighted { bond_numerator: 7 },
            &LocktimeScore,
            0,
            &mut rng,
        )
        .expect("select");
        assert_eq!(picked.len(), 4);
        let mut distinct = std::collections::HashSet::new();
        for chosen in &picked {
            assert!(distinct.insert(chosen.maker.clone()), "maker repeated in one draw");
            *hits.entry(chosen.maker.to_string()).or_default() += 1;
        }
    }

    // exactly three positive-weight makers for three bond slots: each
    // bonded maker appears in every draw
    for maker in ["m0", "m1", "m2"] {
        assert_eq!(hits[maker], DRAWS, "{maker} should fill a bond slot every draw");
    }

    // the last slot is uniform over the 7 unbonded makers: 1/7 each,
    // within generous Monte-Carlo bounds
    let expected = DRAWS as f64 / 7.0;
    for i in 3..10 {
        let count = hits[&format!("m{i}")] as f64;
        assert!(
            (count - expected).abs() < expected * 0.1,
            "m{i} selected {count} times, expected about {expected}"
        );
    }
}

/// With more bonded makers than bond slots, weight ordering shows up in
/// the selection frequencies.
#[test]
fn bond_weights_order_selection_frequencies() {
    const DRAWS: usize = 50_000;
    let mut pool: Vec<Offer> = (0..8).map(|i| offer(&format!("m{i}"), 0, 100)).collect();
    for (slot, (seed, score)) in [(20u8, 1000u32), (21, 300), (22, 100), (23, 30), (24, 10)].iter().enumerate() {
        pool[slot] = with_bond(pool[slot].clone(), *seed, *score);
    }

    let mut rng = StdRng::seed_from_u64(0xdeed);
    let mut hits: HashMap<String, usize> = HashMap::new();
    for _ in 0..DRAWS {
        for chosen in select_makers(
            pool.clone(),
            500_000,
            4,
            SelectionPolicy::FidelityBondWeighted { bond_numerator: 7 },
            &LocktimeScore,
            0,
            &mut rng,
        )
        .expect("select")
        {
            *hits.entry(chosen.maker.to_string()).or_default() += 1;
        }
    }

    // strictly more weight, strictly more selections
    assert!(hits["m0"] > hits["m1"]);
    assert!(hits["m1"] > hits["m2"]);
    assert!(hits["m2"] > hits["m3"]);
    assert!(hits["m3"] > hits["m4"]);
}

#[test]
fn dedupe_bounds_per_maker_probability() {
    // a maker flooding the book with 50 offers still appears once in the
    // deduplicated pool, so per-identity probability is unaffected
    let mut offers: Vec<Offer> = (0..50).map(|oid| offer("flooder", oid, 100 + oid)).collect();
    offers.push(offer("honest", 0, 100));
    let pool = dedupe_cheapest(offers, 500_000);
    assert_eq!(pool.len(), 2);

    let mut rng = StdRng::seed_from_u64(5);
    let mut flooder_hits = 0usize;
    for _ in 0..10_000 {
        let picked =
            select_makers(pool.clone(), 500_000, 1, SelectionPolicy::Random, &LocktimeScore, 0, &mut rng).unwrap();
        if picked[0].maker.as_str() == "flooder" {
            flooder_hits += 1;
        }
    }
    // close to one half, nowhere near 50/51
    assert!((4_500..=5_500).contains(&flooder_hits), "flooder selected {flooder_hits} of 10000");
}

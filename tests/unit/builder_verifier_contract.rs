//! The taker's builder and the maker's verifier must agree: anything the
//! builder assembles honestly is acceptable to every participating
//! maker, and one satoshi of taker greed flips the verdict.

use crate::fixtures::{outpoint, spk};
use coinjoin_core::application::builder::{build_unsigned, BuildRequest, MakerLeg};
use coinjoin_core::domain::verifier::{verify_unsigned_tx, MakerContract, VerifyError};
use coinjoin_core::foundation::Nick;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;

fn three_maker_request() -> BuildRequest {
    let mut makers = HashMap::new();
    for tag in 1..=3u8 {
        makers.insert(
            Nick::new(format!("J5maker{tag}OOOOOOO")),
            MakerLeg {
                utxos: vec![(outpoint(tag, 0), 100_000_000)],
                cj_spk: spk(tag),
                change_spk: spk(tag + 100),
                real_cjfee: 1000,
                txfee_contribution: 200,
            },
        );
    }
    BuildRequest {
        cj_amount: 500_000,
        taker_utxos: vec![(outpoint(0xaa, 0), 100_000_000)],
        taker_cj_spk: spk(50),
        taker_change_spk: spk(51),
        makers,
        tx_fee: 2000,
        dust_threshold: 27_300,
    }
}

fn contract_for(request: &BuildRequest, leg: &MakerLeg) -> MakerContract {
    MakerContract {
        my_utxos: leg.utxos.iter().map(|(op, _)| *op).collect(),
        my_total_in: leg.total_in(),
        cj_amount: request.cj_amount,
        txfee_share: leg.txfee_contribution,
        real_cjfee: leg.real_cjfee,
        my_cj_spk: leg.cj_spk.clone(),
        my_change_spk: leg.change_spk.clone(),
        dust_threshold: request.dust_threshold,
    }
}

#[test]
fn every_maker_accepts_an_honest_build() {
    let request = three_maker_request();
    let mut rng = StdRng::seed_from_u64(42);
    let built = build_unsigned(&request, &Nick::new("J5takerOOOOOOOOO"), &mut rng).expect("build");
    let bytes = built.tx.serialize();

    for leg in request.makers.values() {
        let contract = contract_for(&request, leg);
        verify_unsigned_tx(&bytes, &contract).expect("maker accepts honest build");
    }
}

#[test]
fn shorting_one_maker_is_caught_by_that_maker_only() {
    let request = three_maker_request();
    let mut rng = StdRng::seed_from_u64(43);
    let mut built = build_unsigned(&request, &Nick::new("J5takerOOOOOOOOO"), &mut rng).expect("build");

    // steal one satoshi from maker 1's change output
    let victim = request.makers.values().find(|leg| leg.cj_spk == spk(1)).unwrap();
    let change_value = contract_for(&request, victim).expected_change() as u64;
    let output = built
        .tx
        .outputs
        .iter_mut()
        .find(|o| o.script_pubkey == victim.change_spk && o.value == change_value)
        .expect("victim change output");
    output.value -= 1;
    let bytes = built.tx.serialize();

    for leg in request.makers.values() {
        let contract = contract_for(&request, leg);
        let verdict = verify_unsigned_tx(&bytes, &contract);
        if leg.cj_spk == victim.cj_spk {
            assert!(matches!(verdict, Err(VerifyError::ChangeTooSmall { .. })));
        } else {
            assert!(verdict.is_ok(), "uninvolved maker must not object");
        }
    }
}

#[test]
fn dropping_a_maker_input_is_caught() {
    let request = three_maker_request();
    let mut rng = StdRng::seed_from_u64(44);
    let mut built = build_unsigned(&request, &Nick::new("J5takerOOOOOOOOO"), &mut rng).expect("build");

    built.tx.inputs.retain(|input| input.outpoint != outpoint(2, 0));
    let bytes = built.tx.serialize();

    let victim = request.makers.values().find(|leg| leg.utxos[0].0 == outpoint(2, 0)).unwrap();
    let verdict = verify_unsigned_tx(&bytes, &contract_for(&request, victim));
    assert!(matches!(verdict, Err(VerifyError::MissingUtxo(_))));
}

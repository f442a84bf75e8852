//! A selected maker never answers `!fill`; the taker draws a
//! replacement from the deduplicated pool and completes anyway.

use crate::fixtures::{build_taker, spk, start_maker, start_silent_maker, MakerSetup};
use coinjoin_core::application::taker::CoinjoinRequest;
use coinjoin_core::domain::selection::SelectionPolicy;
use coinjoin_core::infrastructure::oracle::MockUtxoOracle;
use coinjoin_core::infrastructure::storage::NickStateFile;
use coinjoin_core::infrastructure::transport::mock::MockDirectory;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn silent_maker_is_replaced() {
    let data_dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(MockUtxoOracle::new(800_000, 2));
    let directories = vec![MockDirectory::new("dir1.onion")];

    for seed in 1..=3u8 {
        start_maker(MakerSetup { seed, ..Default::default() }, &directories, Arc::clone(&oracle), data_dir.path())
            .await;
    }
    // the silent maker undercuts everyone, so `cheapest` must pick it
    let silent = start_silent_maker(9, 1, &directories).await;

    let (mut taker, taker_coin) = build_taker(0x71, 3, &directories, Arc::clone(&oracle), data_dir.path()).await;
    taker.set_selection_policy(SelectionPolicy::Cheapest);

    let request = CoinjoinRequest {
        amount: 500_000,
        taker_utxos: vec![taker_coin],
        cj_destination: spk(0xe0),
        change_destination: spk(0xe1),
        podle_key: [0x71; 32],
        podle_utxo: taker_coin,
        offer_kind: None,
    };
    let outcome = taker.run(request).await.expect("run completes after replacement");

    assert_eq!(outcome.makers.len(), 3);
    assert!(!outcome.makers.contains(&silent), "silent maker must have been replaced");
}

/// The operator runs a maker of their own from the same state directory;
/// the taker must never pick it, even when it is the cheapest offer.
#[tokio::test(start_paused = true)]
async fn operator_own_maker_nick_is_excluded() {
    let data_dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(MockUtxoOracle::new(800_000, 2));
    let directories = vec![MockDirectory::new("dir1.onion")];

    // cheapest offer on the book, and perfectly honest: only the state
    // file keeps it out of the run
    let own = start_maker(
        MakerSetup { seed: 1, cjfee_abs: 500, ..Default::default() },
        &directories,
        Arc::clone(&oracle),
        data_dir.path(),
    )
    .await;
    for seed in 2..=4u8 {
        start_maker(MakerSetup { seed, ..Default::default() }, &directories, Arc::clone(&oracle), data_dir.path())
            .await;
    }

    let (mut taker, taker_coin) = build_taker(0x75, 3, &directories, Arc::clone(&oracle), data_dir.path()).await;
    taker.set_selection_policy(SelectionPolicy::Cheapest);

    // the operator's maker process advertised itself in the shared state
    // directory (the taker fixture binds `<data_dir>/taker`)
    let taker_state = data_dir.path().join("taker");
    let _maker_state = NickStateFile::write(&taker_state, "maker", &own).unwrap();

    let request = CoinjoinRequest {
        amount: 500_000,
        taker_utxos: vec![taker_coin],
        cj_destination: spk(0xe0),
        change_destination: spk(0xe1),
        podle_key: [0x75; 32],
        podle_utxo: taker_coin,
        offer_kind: None,
    };
    let outcome = taker.run(request).await.expect("run completes without the operator's own maker");

    assert_eq!(outcome.makers.len(), 3);
    assert!(!outcome.makers.contains(&own), "own maker nick must be excluded from selection");

    // clean shutdown removes the taker's own nick advertisement
    assert_eq!(NickStateFile::read(&taker_state, "taker").unwrap(), Some(taker.nick().clone()));
    taker.shutdown().unwrap();
    assert_eq!(NickStateFile::read(&taker_state, "taker").unwrap(), None);
}

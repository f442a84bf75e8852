//! A maker whose offer cannot turn a profit refuses to sign; the taker
//! treats it as failed and finishes with a replacement.

use crate::fixtures::{build_taker, spk, start_maker, MakerSetup};
use coinjoin_core::application::taker::CoinjoinRequest;
use coinjoin_core::domain::selection::SelectionPolicy;
use coinjoin_core::infrastructure::oracle::MockUtxoOracle;
use coinjoin_core::infrastructure::storage::TakerCommitmentStore;
use coinjoin_core::infrastructure::transport::mock::MockDirectory;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn refusing_maker_is_replaced_on_retry() {
    let data_dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(MockUtxoOracle::new(800_000, 2));
    let directories = vec![MockDirectory::new("dir1.onion")];

    // cheapest on paper, but its cjfee does not cover its own txfee
    // contribution: the verifier's profit clause refuses at !tx time
    let bad = start_maker(
        MakerSetup { seed: 1, cjfee_abs: 100, txfee_contribution: 200, ..Default::default() },
        &directories,
        Arc::clone(&oracle),
        data_dir.path(),
    )
    .await;
    for seed in 2..=4u8 {
        start_maker(MakerSetup { seed, ..Default::default() }, &directories, Arc::clone(&oracle), data_dir.path())
            .await;
    }

    let (mut taker, taker_coin) = build_taker(0x72, 3, &directories, Arc::clone(&oracle), data_dir.path()).await;
    taker.set_selection_policy(SelectionPolicy::Cheapest);

    let request = CoinjoinRequest {
        amount: 500_000,
        taker_utxos: vec![taker_coin],
        cj_destination: spk(0xe0),
        change_destination: spk(0xe1),
        podle_key: [0x72; 32],
        podle_utxo: taker_coin,
        offer_kind: None,
    };
    let outcome = taker.run(request).await.expect("run completes on retry");

    assert_eq!(outcome.makers.len(), 3);
    assert!(!outcome.makers.contains(&bad), "refusing maker must not be in the final set");

    // the retry consumed a second PoDLE index
    let store = TakerCommitmentStore::open(&data_dir.path().join("taker")).unwrap();
    let indices: Vec<u8> = store.used().records().iter().map(|r| r.nums_index).collect();
    assert_eq!(indices, vec![0, 1]);
}

//! One taker, three makers, everybody honest.

use crate::fixtures::{build_taker, spk, start_maker, MakerSetup};
use coinjoin_core::application::taker::CoinjoinRequest;
use coinjoin_core::domain::tx::Transaction;
use coinjoin_core::infrastructure::oracle::MockUtxoOracle;
use coinjoin_core::infrastructure::transport::mock::MockDirectory;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn three_maker_coinjoin_completes() {
    let data_dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(MockUtxoOracle::new(800_000, 2));
    let directories = vec![MockDirectory::new("dir1.onion")];

    for seed in 1..=3u8 {
        start_maker(MakerSetup { seed, ..Default::default() }, &directories, Arc::clone(&oracle), data_dir.path())
            .await;
    }

    let (mut taker, taker_coin) = build_taker(0x70, 3, &directories, Arc::clone(&oracle), data_dir.path()).await;
    let request = CoinjoinRequest {
        amount: 500_000,
        taker_utxos: vec![taker_coin],
        cj_destination: spk(0xe0),
        change_destination: spk(0xe1),
        podle_key: [0x70; 32],
        podle_utxo: taker_coin,
        offer_kind: None,
    };

    let outcome = taker.run(request).await.expect("coinjoin should complete");
    // let the maker tasks process the !push fan-out
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(outcome.makers.len(), 3);
    assert_eq!(outcome.tx.inputs.len(), 4);
    // 4 equal coinjoin outputs, 3 maker changes, 1 taker change
    assert_eq!(outcome.tx.outputs.len(), 8);
    assert_eq!(outcome.tx.outputs.iter().filter(|o| o.value == 500_000).count(), 4);

    // fully signed: every input carries a witness stack
    let witnesses = outcome.tx.witnesses.as_ref().expect("witnesses attached");
    assert_eq!(witnesses.len(), 4);
    assert!(witnesses.iter().all(|stack| !stack.is_empty()));

    // MULTIPLE_PEERS pushed through makers, who each handed the raw tx
    // to the chain; every copy must parse back to the same txid
    assert!(oracle.broadcast_count() >= 1);
    let pushed = Transaction::parse(&oracle.last_broadcast().unwrap()).unwrap();
    assert_eq!(pushed.txid(), outcome.txid);
}

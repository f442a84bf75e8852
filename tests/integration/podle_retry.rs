//! Commitments are single-use: a second run from the same UTXO falls
//! back to the next NUMS index, because every maker blacklisted the
//! first commitment (and gossiped it via `!hp2`).

use crate::fixtures::{build_taker, spk, start_maker, MakerSetup};
use coinjoin_core::application::schedule::{run_schedule, ScheduleEntry};
use coinjoin_core::application::taker::CoinjoinRequest;
use coinjoin_core::infrastructure::oracle::MockUtxoOracle;
use coinjoin_core::infrastructure::storage::TakerCommitmentStore;
use coinjoin_core::infrastructure::transport::mock::MockDirectory;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn second_run_uses_next_podle_index() {
    let data_dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(MockUtxoOracle::new(800_000, 2));
    let directories = vec![MockDirectory::new("dir1.onion")];

    for seed in 1..=3u8 {
        start_maker(MakerSetup { seed, ..Default::default() }, &directories, Arc::clone(&oracle), data_dir.path())
            .await;
    }

    let (mut taker, taker_coin) = build_taker(0x73, 3, &directories, Arc::clone(&oracle), data_dir.path()).await;
    let request = CoinjoinRequest {
        amount: 500_000,
        taker_utxos: vec![taker_coin],
        cj_destination: spk(0xe0),
        change_destination: spk(0xe1),
        podle_key: [0x73; 32],
        podle_utxo: taker_coin,
        offer_kind: None,
    };

    let first = taker.run(request.clone()).await.expect("first run");
    // first run consumed some of the taker's coin in the real world; the
    // mock oracle still has it, so the same request can run again
    let second = taker.run(request).await.expect("second run");
    assert_ne!(first.txid, second.txid);

    let store = TakerCommitmentStore::open(&data_dir.path().join("taker")).unwrap();
    let mut indices: Vec<u8> = store.used().records().iter().map(|r| r.nums_index).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1], "second run must burn the next index");

    // and the two commitments are distinct
    let commitments: std::collections::HashSet<_> =
        store.used().records().iter().map(|r| r.commitment).collect();
    assert_eq!(commitments.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn schedule_runs_entries_sequentially() {
    let data_dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(MockUtxoOracle::new(800_000, 2));
    let directories = vec![MockDirectory::new("dir1.onion")];

    for seed in 1..=3u8 {
        start_maker(MakerSetup { seed, ..Default::default() }, &directories, Arc::clone(&oracle), data_dir.path())
            .await;
    }

    let (mut taker, taker_coin) = build_taker(0x74, 3, &directories, Arc::clone(&oracle), data_dir.path()).await;
    let entry = |mixdepth: u32, dest: u8| ScheduleEntry {
        mixdepth,
        amount: 500_000,
        counterparty_count: 3,
        destination: spk(dest),
        change_destination: spk(dest + 1),
        wait_secs: 5,
        taker_utxos: vec![taker_coin],
        podle_key: [0x74; 32],
        podle_utxo: taker_coin,
    };

    let report = run_schedule(&mut taker, &[entry(0, 0xd0), entry(1, 0xd2)]).await.expect("schedule");
    assert_eq!(report.completed.len(), 2);
    // each hop pays to its own rotated destination
    assert!(report.completed[0].tx.outputs.iter().any(|o| o.script_pubkey == spk(0xd0)));
    assert!(report.completed[1].tx.outputs.iter().any(|o| o.script_pubkey == spk(0xd2)));
}

//! Shared test fixtures: funded oracles, in-memory directories, and
//! ready-to-serve maker engines.

#![allow(dead_code)]

use coinjoin_core::application::maker::{BondIdentity, MakerEngine, MakerWalletProfile};
use coinjoin_core::application::taker::TakerEngine;
use coinjoin_core::domain::nick::NickIdentity;
use coinjoin_core::domain::offer::{Offer, OfferKind};
use coinjoin_core::domain::selection::FlatBondScorer;
use coinjoin_core::foundation::{Nick, Outpoint, Txid};
use coinjoin_core::infrastructure::config::AppConfig;
use coinjoin_core::infrastructure::oracle::{MockUtxoOracle, MockWalletSigner, UtxoEntry};
use coinjoin_core::infrastructure::storage::{BlacklistHandle, TakerCommitmentStore};
use coinjoin_core::infrastructure::transport::mock::MockDirectory;
use coinjoin_core::infrastructure::transport::{merge_subscriptions, MessageChannel};
use std::path::Path;
use std::sync::Arc;

pub fn outpoint(fill: u8, vout: u32) -> Outpoint {
    Outpoint::new(Txid::new([fill; 32]), vout)
}

pub fn spk(tag: u8) -> Vec<u8> {
    let mut script = vec![0x00, 0x14];
    script.extend_from_slice(&[tag; 20]);
    script
}

/// Config tuned for tests: short discovery window, small counterparty
/// count set by the caller.
pub fn test_config(counterparties: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.coinjoin.counterparty_count = counterparties;
    config.coinjoin.order_wait_time_secs = 3;
    config.coinjoin.fee_rate_sat_vb = Some(2);
    config.timeouts.session_timeout_sec = 30;
    config
}

pub struct MakerSetup {
    pub seed: u8,
    pub utxo_value: u64,
    pub cjfee_abs: u64,
    pub txfee_contribution: u64,
    pub bond: bool,
}

impl Default for MakerSetup {
    fn default() -> Self {
        Self { seed: 1, utxo_value: 100_000_000, cjfee_abs: 1000, txfee_contribution: 200, bond: false }
    }
}

/// Fund the maker's wallet in the oracle, wire it to every directory and
/// let it serve in the background. Returns its nick.
pub async fn start_maker(
    setup: MakerSetup,
    directories: &[Arc<MockDirectory>],
    oracle: Arc<MockUtxoOracle>,
    data_dir: &Path,
) -> Nick {
    let identity = NickIdentity::from_secret_bytes(&[setup.seed; 32]).expect("identity");
    let nick = identity.nick().clone();

    // one funded coin per maker, confirmed long ago
    let coin = outpoint(setup.seed, 0);
    oracle.add_utxo(coin, UtxoEntry { script_pubkey: spk(setup.seed), value: setup.utxo_value, height: Some(1) });

    let offer = Offer::parse_wire_args(
        nick.clone(),
        OfferKind::Absolute,
        &format!("0 100000 {} {} {}", setup.utxo_value / 2, setup.txfee_contribution, setup.cjfee_abs),
        0,
    )
    .expect("offer");

    let profile = MakerWalletProfile {
        utxos: vec![coin],
        cj_spk: spk(setup.seed.wrapping_add(50)),
        change_spk: spk(setup.seed.wrapping_add(100)),
    };

    let bond = if setup.bond {
        let key = secp256k1::SecretKey::from_slice(&[setup.seed.wrapping_add(7); 32]).expect("bond key");
        let bond_utxo = outpoint(setup.seed.wrapping_add(200), 0);
        oracle.add_utxo(
            bond_utxo,
            UtxoEntry { script_pubkey: vec![0x00, 0x20].into_iter().chain([setup.seed; 32]).collect(), value: 10_000_000, height: Some(1) },
        );
        Some(BondIdentity { cert_key: key, utxo_key: key, cert_expiry: 500, bond_utxo, locktime: 1_900_000_000 })
    } else {
        None
    };

    let maker_dir = data_dir.join(format!("maker-{}", setup.seed));
    std::fs::create_dir_all(&maker_dir).expect("maker dir");
    let blacklist = BlacklistHandle::spawn(&maker_dir).expect("blacklist");

    let channels: Vec<Arc<dyn MessageChannel>> =
        directories.iter().map(|d| d.channel() as Arc<dyn MessageChannel>).collect();
    let inbox = merge_subscriptions(&channels).await.expect("subscriptions");

    let mut engine = MakerEngine::new(
        identity,
        channels,
        oracle,
        Arc::new(MockWalletSigner),
        blacklist,
        test_config(3),
        offer,
        profile,
        bond,
    );
    engine.bind_state_dir(&maker_dir).expect("nick state");
    tokio::spawn(engine.serve(inbox));
    nick
}

/// A maker-shaped peer that advertises an offer but never answers a
/// `!fill`: the "stalled counterparty" of replacement scenarios.
pub async fn start_silent_maker(
    seed: u8,
    cjfee_abs: u64,
    directories: &[Arc<MockDirectory>],
) -> Nick {
    use coinjoin_core::foundation::commands;
    use coinjoin_core::infrastructure::message::command::{self, AppMessage};
    use coinjoin_core::infrastructure::message::envelope::{Envelope, EnvelopeType};

    let identity = NickIdentity::from_secret_bytes(&[seed; 32]).expect("identity");
    let nick = identity.nick().clone();
    let offer_args = format!("0 100000 50000000 0 {cjfee_abs}");

    for directory in directories {
        let channel = directory.channel();
        let mut subscription = channel.subscribe().await.expect("subscribe");
        let identity = NickIdentity::from_secret_bytes(&[seed; 32]).expect("identity");
        let offer_args = offer_args.clone();
        tokio::spawn(async move {
            while let Some(Ok(incoming)) = subscription.next().await {
                if incoming.envelope.kind != EnvelopeType::Pubmsg {
                    continue;
                }
                let Ok(msg) = AppMessage::parse(&incoming.envelope.line) else { continue };
                if msg.command != commands::ORDERBOOK || msg.from == *identity.nick() {
                    continue;
                }
                let reply =
                    AppMessage::new(identity.nick().clone(), msg.from.clone(), commands::ABSOFFER, offer_args.clone());
                let line = command::format_signed(&reply, &identity, &incoming.hostid);
                let _ = channel.send(Envelope::new(EnvelopeType::Privmsg, line)).await;
            }
        });
    }
    nick
}

/// A taker wired to every directory, with a funded coin of its own.
pub async fn build_taker(
    seed: u8,
    counterparties: usize,
    directories: &[Arc<MockDirectory>],
    oracle: Arc<MockUtxoOracle>,
    data_dir: &Path,
) -> (TakerEngine, Outpoint) {
    let identity = NickIdentity::from_secret_bytes(&[seed; 32]).expect("identity");
    let coin = outpoint(seed, 0);
    oracle.add_utxo(coin, UtxoEntry { script_pubkey: spk(seed), value: 100_000_000, height: Some(1) });

    let taker_dir = data_dir.join("taker");
    std::fs::create_dir_all(&taker_dir).expect("taker dir");
    let commitments = TakerCommitmentStore::open(&taker_dir).expect("commitment store");

    let channels: Vec<Arc<dyn MessageChannel>> =
        directories.iter().map(|d| d.channel() as Arc<dyn MessageChannel>).collect();
    let inbox = merge_subscriptions(&channels).await.expect("subscriptions");

    let mut engine = TakerEngine::new(
        identity,
        channels,
        inbox,
        oracle,
        Arc::new(MockWalletSigner),
        Arc::new(FlatBondScorer),
        test_config(counterparties),
        commitments,
        None,
    );
    engine.bind_state_dir(&taker_dir).expect("nick state");
    engine.seed_rng(u64::from(seed));
    (engine, coin)
}

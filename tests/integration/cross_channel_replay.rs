//! An `!auth` captured on one directory and replayed on another dies on
//! the anti-replay signature: the signed hostid differs.

use crate::fixtures::{outpoint, spk, test_config};
use coinjoin_core::application::maker::{MakerEngine, MakerWalletProfile};
use coinjoin_core::application::protocol::{parse_pubkey_args, AuthPayload, FillMsg};
use coinjoin_core::domain::nick::NickIdentity;
use coinjoin_core::domain::offer::{Offer, OfferKind};
use coinjoin_core::domain::podle::{self, PodleReveal};
use coinjoin_core::domain::session::MakerPhase;
use coinjoin_core::foundation::{commands, CoinjoinError, Nick};
use coinjoin_core::infrastructure::message::boxer;
use coinjoin_core::infrastructure::message::command::{self, AppMessage};
use coinjoin_core::infrastructure::message::envelope::{Envelope, EnvelopeType};
use coinjoin_core::infrastructure::message::utxo::UtxoRef;
use coinjoin_core::infrastructure::oracle::{MockUtxoOracle, MockWalletSigner, UtxoEntry};
use coinjoin_core::infrastructure::storage::BlacklistHandle;
use coinjoin_core::infrastructure::transport::mock::MockDirectory;
use coinjoin_core::infrastructure::transport::{Incoming, MessageChannel};
use std::sync::Arc;

fn incoming(hostid: &str, line: String) -> Incoming {
    Incoming { hostid: hostid.to_string(), envelope: Envelope::new(EnvelopeType::Privmsg, line) }
}

#[tokio::test]
async fn auth_replayed_on_second_directory_is_discarded() {
    let data_dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(MockUtxoOracle::new(800_000, 2));

    // taker's PoDLE coin, well confirmed and big enough
    let taker_coin = outpoint(0x61, 0);
    oracle.add_utxo(taker_coin, UtxoEntry { script_pubkey: spk(0x61), value: 100_000_000, height: Some(1) });
    // maker's coin
    let maker_coin = outpoint(0x01, 0);
    oracle.add_utxo(maker_coin, UtxoEntry { script_pubkey: spk(0x01), value: 100_000_000, height: Some(1) });

    let dir1 = MockDirectory::new("dir1.onion");
    let dir2 = MockDirectory::new("dir2.onion");
    let maker_identity = NickIdentity::from_secret_bytes(&[0x01; 32]).unwrap();
    let maker_nick = maker_identity.nick().clone();
    let offer = Offer::parse_wire_args(maker_nick.clone(), OfferKind::Absolute, "0 100000 50000000 200 1000", 0).unwrap();

    let channels: Vec<Arc<dyn MessageChannel>> =
        vec![dir1.channel() as Arc<dyn MessageChannel>, dir2.channel() as Arc<dyn MessageChannel>];
    let mut engine = MakerEngine::new(
        maker_identity,
        channels,
        Arc::clone(&oracle) as Arc<dyn coinjoin_core::infrastructure::oracle::UtxoOracle>,
        Arc::new(MockWalletSigner),
        BlacklistHandle::spawn(data_dir.path()).unwrap(),
        test_config(3),
        offer,
        MakerWalletProfile { utxos: vec![maker_coin], cj_spk: spk(0x33), change_spk: spk(0x34) },
        None,
    );

    // watch dir1 to capture the maker's !pubkey reply
    let mut observer = dir1.channel().subscribe().await.unwrap();

    let taker = NickIdentity::from_secret_bytes(&[0x61; 32]).unwrap();
    let podle = podle::generate(&[0x61; 32], taker_coin, 0).unwrap();
    let (taker_sk, taker_pk) = boxer::generate_keypair();

    // !fill over dir1
    let fill = FillMsg { order_id: 0, amount: 500_000, taker_box_pub: taker_pk, commitment: podle.commitment };
    let fill_msg = AppMessage::new(taker.nick().clone(), maker_nick.clone(), commands::FILL, fill.to_args());
    engine
        .handle_incoming(incoming("dir1.onion", command::format_signed(&fill_msg, &taker, "dir1.onion")))
        .await
        .unwrap();
    assert_eq!(engine.session_phase(taker.nick()), Some(MakerPhase::Filled));

    // read the maker's !pubkey off the wire
    let maker_box_pub = loop {
        let seen = observer.next().await.unwrap().unwrap();
        if seen.envelope.kind != EnvelopeType::Privmsg {
            continue;
        }
        let Ok(msg) = command::parse_signed(&seen.envelope.line, "dir1.onion") else { continue };
        if msg.command == commands::PUBKEY && msg.to == *taker.nick() {
            break parse_pubkey_args(&msg.args).unwrap();
        }
    };

    // legitimate !auth over dir1
    let payload = AuthPayload {
        reveal: PodleReveal { p: podle.p, p2: podle.p2, s: podle.s, e: podle.e, utxo: podle.utxo },
        utxos: vec![UtxoRef::legacy(taker_coin)],
        cj_destination: spk(0xe0),
    };
    let sealed = boxer::seal(
        payload.to_plaintext(&podle.serialize_revelation(), false).as_bytes(),
        &taker_sk,
        &maker_box_pub,
    )
    .unwrap();
    let auth_msg = AppMessage::new(taker.nick().clone(), maker_nick.clone(), commands::AUTH, sealed);
    let auth_line = command::format_signed(&auth_msg, &taker, "dir1.onion");

    engine.handle_incoming(incoming("dir1.onion", auth_line.clone())).await.unwrap();
    assert_eq!(engine.session_phase(taker.nick()), Some(MakerPhase::Authed));

    // the captured bytes replayed on dir2: hostid binding breaks the
    // signature, the message is discarded, session state is untouched
    let err = engine.handle_incoming(incoming("dir2.onion", auth_line)).await.unwrap_err();
    assert!(matches!(err, CoinjoinError::SignatureInvalid));
    assert_eq!(engine.session_phase(taker.nick()), Some(MakerPhase::Authed));

    // the revealed commitment is consumed: a fresh !fill reusing it is
    // rejected outright and the session torn down
    let refill = AppMessage::new(taker.nick().clone(), maker_nick.clone(), commands::FILL, fill.to_args());
    engine
        .handle_incoming(incoming("dir1.onion", command::format_signed(&refill, &taker, "dir1.onion")))
        .await
        .unwrap();
    assert_eq!(engine.session_phase(taker.nick()), None);
}

/// Even with a forged signature for the second channel, the pinned
/// transport makes an out-of-channel `!tx` abort the session.
#[tokio::test]
async fn channel_pinning_rejects_transport_switch() {
    let data_dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(MockUtxoOracle::new(800_000, 2));
    let taker_coin = outpoint(0x62, 0);
    oracle.add_utxo(taker_coin, UtxoEntry { script_pubkey: spk(0x62), value: 100_000_000, height: Some(1) });
    let maker_coin = outpoint(0x02, 0);
    oracle.add_utxo(maker_coin, UtxoEntry { script_pubkey: spk(0x02), value: 100_000_000, height: Some(1) });

    let dir1 = MockDirectory::new("dir1.onion");
    let dir2 = MockDirectory::new("dir2.onion");
    let maker_identity = NickIdentity::from_secret_bytes(&[0x02; 32]).unwrap();
    let maker_nick = maker_identity.nick().clone();
    let offer = Offer::parse_wire_args(maker_nick.clone(), OfferKind::Absolute, "0 100000 50000000 200 1000", 0).unwrap();

    let channels: Vec<Arc<dyn MessageChannel>> =
        vec![dir1.channel() as Arc<dyn MessageChannel>, dir2.channel() as Arc<dyn MessageChannel>];
    let mut engine = MakerEngine::new(
        maker_identity,
        channels,
        Arc::clone(&oracle) as Arc<dyn coinjoin_core::infrastructure::oracle::UtxoOracle>,
        Arc::new(MockWalletSigner),
        BlacklistHandle::spawn(data_dir.path()).unwrap(),
        test_config(3),
        offer,
        MakerWalletProfile { utxos: vec![maker_coin], cj_spk: spk(0x35), change_spk: spk(0x36) },
        None,
    );
    let mut observer = dir1.channel().subscribe().await.unwrap();

    let taker = NickIdentity::from_secret_bytes(&[0x62; 32]).unwrap();
    let podle = podle::generate(&[0x62; 32], taker_coin, 0).unwrap();
    let (taker_sk, taker_pk) = boxer::generate_keypair();

    let fill = FillMsg { order_id: 0, amount: 500_000, taker_box_pub: taker_pk, commitment: podle.commitment };
    let fill_msg = AppMessage::new(taker.nick().clone(), maker_nick.clone(), commands::FILL, fill.to_args());
    engine
        .handle_incoming(incoming("dir1.onion", command::format_signed(&fill_msg, &taker, "dir1.onion")))
        .await
        .unwrap();

    let maker_box_pub = loop {
        let seen = observer.next().await.unwrap().unwrap();
        if seen.envelope.kind != EnvelopeType::Privmsg {
            continue;
        }
        let Ok(msg) = command::parse_signed(&seen.envelope.line, "dir1.onion") else { continue };
        if msg.command == commands::PUBKEY {
            break parse_pubkey_args(&msg.args).unwrap();
        }
    };

    let payload = AuthPayload {
        reveal: PodleReveal { p: podle.p, p2: podle.p2, s: podle.s, e: podle.e, utxo: podle.utxo },
        utxos: vec![UtxoRef::legacy(taker_coin)],
        cj_destination: spk(0xe0),
    };
    let sealed = boxer::seal(
        payload.to_plaintext(&podle.serialize_revelation(), false).as_bytes(),
        &taker_sk,
        &maker_box_pub,
    )
    .unwrap();
    let auth_msg = AppMessage::new(taker.nick().clone(), maker_nick.clone(), commands::AUTH, sealed);
    engine
        .handle_incoming(incoming("dir1.onion", command::format_signed(&auth_msg, &taker, "dir1.onion")))
        .await
        .unwrap();
    assert_eq!(engine.session_phase(taker.nick()), Some(MakerPhase::Authed));

    // attacker-grade taker: re-signs a !tx for dir2 with the real key.
    // The signature verifies, but the session was pinned to dir1.
    let tx_msg = AppMessage::new(
        taker.nick().clone(),
        maker_nick.clone(),
        commands::TX,
        boxer::seal(b"AAAA", &taker_sk, &maker_box_pub).unwrap(),
    );
    let line = command::format_signed(&tx_msg, &taker, "dir2.onion");
    engine.handle_incoming(incoming("dir2.onion", line)).await.unwrap();
    // handled as a session failure: the session is gone
    assert_eq!(engine.session_phase(taker.nick()), None);
}

#[test]
fn nicks_are_stable_fixtures() {
    // fixture identities must be distinct, or the scenarios above are
    // silently testing self-messaging
    let a = NickIdentity::from_secret_bytes(&[0x01; 32]).unwrap();
    let b = NickIdentity::from_secret_bytes(&[0x61; 32]).unwrap();
    assert_ne!(a.nick(), b.nick());
    assert_ne!(a.nick().as_str(), Nick::new("").as_str());
}

//! Envelope, signature and box layers composed, the way a real message
//! traverses them.

use coinjoin_core::domain::nick::NickIdentity;
use coinjoin_core::foundation::{commands, CoinjoinError, Nick};
use coinjoin_core::infrastructure::message::boxer;
use coinjoin_core::infrastructure::message::command::{self, AppMessage};
use coinjoin_core::infrastructure::message::envelope::{Envelope, EnvelopeType};

/// An encrypted command end to end: seal, sign, frame, decode, verify,
/// open.
#[test]
fn encrypted_privmsg_full_stack_roundtrip() {
    let taker = NickIdentity::random();
    let maker = NickIdentity::random();
    let (taker_sk, taker_pk) = boxer::generate_keypair();
    let (maker_sk, maker_pk) = boxer::generate_keypair();

    let sealed = boxer::seal(b"revelation|data here", &taker_sk, &maker_pk).expect("seal");
    let msg = AppMessage::new(taker.nick().clone(), maker.nick().clone(), commands::AUTH, sealed);
    let line = command::format_signed(&msg, &taker, "dir1.onion");
    let wire = Envelope::new(EnvelopeType::Privmsg, line).encode().expect("encode");

    // receiving side
    let envelope = Envelope::decode(&wire).expect("decode");
    assert_eq!(envelope.kind, EnvelopeType::Privmsg);
    let received = command::parse_signed(&envelope.line, "dir1.onion").expect("verify");
    assert_eq!(received.command, commands::AUTH);
    let plaintext = boxer::open(&received.args, &maker_sk, &taker_pk).expect("open");
    assert_eq!(plaintext, b"revelation|data here");
}

#[test]
fn replayed_envelope_fails_on_the_other_channel() {
    let taker = NickIdentity::random();
    let msg = AppMessage::new(taker.nick().clone(), Nick::new("J5makerOOOOOOOOO"), commands::FILL, "0 500000 aa bb");
    let line = command::format_signed(&msg, &taker, "dir1.onion");
    let wire = Envelope::new(EnvelopeType::Privmsg, line).encode().unwrap();

    let envelope = Envelope::decode(&wire).unwrap();
    assert!(command::parse_signed(&envelope.line, "dir1.onion").is_ok());
    let err = command::parse_signed(&envelope.line, "dir2.onion").unwrap_err();
    assert!(matches!(err, CoinjoinError::SignatureInvalid));
}

#[test]
fn encrypted_payload_survives_envelope_json() {
    // base64 padding, plus-signs etc. must survive JSON framing intact
    let (sk_a, pk_a) = boxer::generate_keypair();
    let (sk_b, pk_b) = boxer::generate_keypair();
    let plaintext: Vec<u8> = (0u16..600).map(|i| (i % 256) as u8).collect();
    let sealed = boxer::seal(&plaintext, &sk_a, &pk_b).unwrap();

    let wire = Envelope::new(EnvelopeType::Privmsg, format!("a!b!tx {sealed}")).encode().unwrap();
    let envelope = Envelope::decode(&wire).unwrap();
    let parsed = AppMessage::parse(&envelope.line).unwrap();
    assert_eq!(boxer::open(&parsed.args, &sk_b, &pk_a).unwrap(), plaintext);
}

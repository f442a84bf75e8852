//! Peer nicks and the ephemeral signing identity behind them.
//!
//! A nick commits to a fresh secp256k1 keypair; private messages carry the
//! pubkey and a signature whose plaintext is prefixed with the channel
//! hostid, so a message captured on one channel cannot be replayed on
//! another (the hostid differs and the signature no longer verifies).

use crate::foundation::{
    constants::{DIRECT_HOSTID, NICK_HASH_LEN, NICK_MAX_ENCODED, NICK_PAD_CHAR, NICK_PREFIX, PROTO_VERSION, PROTO_VERSION_MIN},
    CoinjoinError, Nick, Result,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

/// Derive the nick for a compressed signing pubkey.
pub fn nick_from_pubkey(pubkey: &PublicKey) -> Nick {
    let digest = Sha256::digest(pubkey.serialize());
    let mut encoded = bs58::encode(&digest[..NICK_HASH_LEN]).into_string();
    while encoded.len() < NICK_MAX_ENCODED {
        encoded.push(NICK_PAD_CHAR);
    }
    Nick::new(format!("{}{}{}", NICK_PREFIX, PROTO_VERSION, encoded))
}

/// Protocol version baked into a nick, or the minimum version when the
/// nick does not carry one.
pub fn nick_version(nick: &str) -> u8 {
    let mut chars = nick.chars();
    match (chars.next(), chars.next()) {
        (Some(NICK_PREFIX), Some(digit)) if digit.is_ascii_digit() => digit as u8 - b'0',
        _ => PROTO_VERSION_MIN,
    }
}

/// Hostid binding for anti-replay signatures: the directory host for
/// relayed channels, a fixed literal for direct peer connections.
pub fn hostid_for(directory_host: Option<&str>) -> String {
    match directory_host {
        Some(host) => host.to_string(),
        None => DIRECT_HOSTID.to_string(),
    }
}

/// Ephemeral per-process signing identity. Created at startup, thrown
/// away at shutdown; the nick is its fingerprint.
pub struct NickIdentity {
    secret: SecretKey,
    public: PublicKey,
    nick: Nick,
}

impl NickIdentity {
    pub fn random() -> Self {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
        let nick = nick_from_pubkey(&public);
        Self { secret, public, nick }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(bytes)?;
        let public = PublicKey::from_secret_key(&secp, &secret);
        let nick = nick_from_pubkey(&public);
        Ok(Self { secret, public, nick })
    }

    pub fn nick(&self) -> &Nick {
        &self.nick
    }

    pub fn pubkey_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }

    /// Sign `hostid || command || " " || args`; returns the base64 DER
    /// signature to append after the pubkey on the wire.
    pub fn sign_message(&self, hostid: &str, command: &str, args: &str) -> String {
        let secp = Secp256k1::new();
        let digest = signed_digest(hostid, command, args);
        let sig = secp.sign_ecdsa(&Message::from_digest(digest), &self.secret);
        BASE64.encode(sig.serialize_der())
    }
}

/// Verify an incoming message signature and its nick binding.
///
/// Checks (a) the DER signature over the hostid-bound plaintext against
/// the claimed pubkey and (b) that the pubkey actually hashes to
/// `from_nick`, so a valid signature from some *other* identity cannot be
/// attached to an arbitrary nick.
pub fn verify_message(
    from_nick: &Nick,
    pubkey_hex: &str,
    sig_b64: &str,
    hostid: &str,
    command: &str,
    args: &str,
) -> Result<()> {
    let secp = Secp256k1::new();
    let pubkey_bytes = hex::decode(pubkey_hex)?;
    let pubkey = PublicKey::from_slice(&pubkey_bytes)?;

    let derived = nick_from_pubkey(&pubkey);
    if &derived != from_nick {
        return Err(CoinjoinError::NickMismatch { claimed: from_nick.to_string(), derived: derived.to_string() });
    }

    let sig_der = BASE64.decode(sig_b64)?;
    let sig = Signature::from_der(&sig_der).map_err(|_| CoinjoinError::SignatureInvalid)?;
    let digest = signed_digest(hostid, command, args);
    secp.verify_ecdsa(&Message::from_digest(digest), &sig, &pubkey).map_err(|_| CoinjoinError::SignatureInvalid)
}

fn signed_digest(hostid: &str, command: &str, args: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(hostid.as_bytes());
    hasher.update(command.as_bytes());
    hasher.update(b" ");
    hasher.update(args.as_bytes());
    let first: [u8; 32] = hasher.finalize().into();
    Sha256::digest(first).into()
}

//! Per-session authenticated encryption.
//!
//! Each session exchanges fresh x25519 keys (`!fill` carries the taker's,
//! `!pubkey` the maker's); encrypted commands are sealed with the shared
//! secret of the two session keys under ChaCha20-Poly1305 and travel as
//! base64 `nonce || ciphertext`. The symmetric key is derived identically
//! on both sides by hashing the shared secret with the two public keys in
//! sorted order.

use crate::foundation::{CoinjoinError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

const NONCE_LEN: usize = 12;
const KEY_DOMAIN: &[u8] = b"coinjoin.session.box.v1";

/// Fresh session keypair as raw bytes, one per taker<->maker pairing.
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let secret = StaticSecret::random_from_rng(rand::thread_rng());
    let public = PublicKey::from(&secret);
    (secret.to_bytes(), *public.as_bytes())
}

pub fn public_from_secret(secret: &[u8; 32]) -> [u8; 32] {
    *PublicKey::from(&StaticSecret::from(*secret)).as_bytes()
}

fn session_key(our_secret: &[u8; 32], their_public: &[u8; 32]) -> [u8; 32] {
    let secret = StaticSecret::from(*our_secret);
    let our_public = *PublicKey::from(&secret).as_bytes();
    let shared = secret.diffie_hellman(&PublicKey::from(*their_public));

    let (lo, hi) =
        if our_public <= *their_public { (our_public, *their_public) } else { (*their_public, our_public) };
    let mut hasher = blake3::Hasher::new();
    hasher.update(KEY_DOMAIN);
    hasher.update(shared.as_bytes());
    hasher.update(&lo);
    hasher.update(&hi);
    *hasher.finalize().as_bytes()
}

/// Encrypt for the session counterparty; output is base64 and goes into
/// the command's argument slot.
pub fn seal(plaintext: &[u8], our_secret: &[u8; 32], their_public: &[u8; 32]) -> Result<String> {
    let key = session_key(our_secret, their_public);
    let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|err| CoinjoinError::crypto("box-init", err))?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CoinjoinError::crypto("box-seal", "encryption failed"))?;

    let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    wire.extend_from_slice(&nonce);
    wire.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(wire))
}

/// Decrypt a sealed argument. Failure is a cryptographic session error,
/// never something to retry.
pub fn open(encoded: &str, our_secret: &[u8; 32], their_public: &[u8; 32]) -> Result<Vec<u8>> {
    let wire = BASE64.decode(encoded)?;
    if wire.len() < NONCE_LEN {
        return Err(CoinjoinError::DecryptFailed);
    }
    let (nonce, ciphertext) = wire.split_at(NONCE_LEN);
    let key = session_key(our_secret, their_public);
    let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|err| CoinjoinError::crypto("box-init", err))?;
    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| CoinjoinError::DecryptFailed)
}

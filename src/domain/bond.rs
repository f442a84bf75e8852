//! Fidelity bond proofs.
//!
//! A maker proves control of a timelocked UTXO to improve its selection
//! weight. The proof is a fixed 252-byte record, base64 on the wire:
//!
//! `nick_sig(72) | cert_sig(72) | cert_pub(33) | cert_expiry u16 LE |
//!  utxo_pub(33) | txid(32) | vout u32 LE | locktime u32 LE`
//!
//! DER signatures are left-padded to 72 bytes with `0xff`; the DER header
//! byte `0x30` makes stripping unambiguous. The certificate lets the bond
//! key stay cold: the UTXO key signs the certificate once, the cert key
//! signs per-counterparty nick messages.

use crate::domain::tx::write_varint;
use crate::foundation::{CoinjoinError, Nick, Outpoint, Result, Txid, RETARGET_PERIOD};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const BOND_PROOF_LEN: usize = 252;
const SIG_SLOT_LEN: usize = 72;
const MESSAGE_MAGIC: &[u8] = b"\x18Bitcoin Signed Message:\n";
const CERT_MSG_PREFIX: &[u8] = b"fidelity-bond-cert|";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondProof {
    #[serde(with = "serde_bytes_vec")]
    pub nick_sig: Vec<u8>,
    #[serde(with = "serde_bytes_vec")]
    pub cert_sig: Vec<u8>,
    #[serde(with = "serde_pubkey")]
    pub cert_pub: [u8; 33],
    /// Absolute difficulty-retarget period number; the certificate is
    /// valid while `height < cert_expiry * 2016`.
    pub cert_expiry: u16,
    #[serde(with = "serde_pubkey")]
    pub utxo_pub: [u8; 33],
    pub txid: Txid,
    pub vout: u32,
    pub locktime: u32,
}

mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod serde_pubkey {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 33], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 33], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("expected 33 bytes"))
    }
}

impl BondProof {
    pub fn outpoint(&self) -> Outpoint {
        Outpoint::new(self.txid, self.vout)
    }

    pub fn expiry_height(&self) -> u32 {
        u32::from(self.cert_expiry) * RETARGET_PERIOD
    }

    pub fn is_expired(&self, current_height: u32) -> bool {
        current_height >= self.expiry_height()
    }

    pub fn serialize(&self) -> Result<[u8; BOND_PROOF_LEN]> {
        let mut out = [0u8; BOND_PROOF_LEN];
        let mut pos = 0;
        for sig in [&self.nick_sig, &self.cert_sig] {
            if sig.len() > SIG_SLOT_LEN {
                return Err(CoinjoinError::BondInvalid(format!("signature {} bytes exceeds slot", sig.len())));
            }
            let pad = SIG_SLOT_LEN - sig.len();
            out[pos..pos + pad].fill(0xff);
            out[pos + pad..pos + SIG_SLOT_LEN].copy_from_slice(sig);
            pos += SIG_SLOT_LEN;
        }
        out[pos..pos + 33].copy_from_slice(&self.cert_pub);
        pos += 33;
        out[pos..pos + 2].copy_from_slice(&self.cert_expiry.to_le_bytes());
        pos += 2;
        out[pos..pos + 33].copy_from_slice(&self.utxo_pub);
        pos += 33;
        out[pos..pos + 32].copy_from_slice(self.txid.as_bytes());
        pos += 32;
        out[pos..pos + 4].copy_from_slice(&self.vout.to_le_bytes());
        pos += 4;
        out[pos..pos + 4].copy_from_slice(&self.locktime.to_le_bytes());
        Ok(out)
    }

    pub fn to_base64(&self) -> Result<String> {
        Ok(BASE64.encode(self.serialize()?))
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != BOND_PROOF_LEN {
            return Err(CoinjoinError::BondInvalid(format!("proof is {} bytes, expected {BOND_PROOF_LEN}", data.len())));
        }
        let nick_sig = strip_sig_padding(&data[0..72])?;
        let cert_sig = strip_sig_padding(&data[72..144])?;
        let mut cert_pub = [0u8; 33];
        cert_pub.copy_from_slice(&data[144..177]);
        let cert_expiry = u16::from_le_bytes([data[177], data[178]]);
        let mut utxo_pub = [0u8; 33];
        utxo_pub.copy_from_slice(&data[179..212]);
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&data[212..244]);
        let vout = u32::from_le_bytes([data[244], data[245], data[246], data[247]]);
        let locktime = u32::from_le_bytes([data[248], data[249], data[250], data[251]]);
        Ok(Self { nick_sig, cert_sig, cert_pub, cert_expiry, utxo_pub, txid: Txid::new(txid), vout, locktime })
    }

    pub fn from_base64(data: &str) -> Result<Self> {
        Self::parse(&BASE64.decode(data)?)
    }

    /// Verify both signatures and the expiry window.
    ///
    /// The certificate message embeds `cert_pub` either as raw bytes or as
    /// ascii hex; signers in the wild produce both, so both are tried.
    pub fn verify(&self, maker_nick: &Nick, taker_nick: &Nick, current_height: u32) -> Result<()> {
        if self.is_expired(current_height) {
            return Err(CoinjoinError::BondInvalid(format!(
                "certificate expired at height {} (current {current_height})",
                self.expiry_height()
            )));
        }

        let cert_key = PublicKey::from_slice(&self.cert_pub)
            .map_err(|err| CoinjoinError::BondInvalid(format!("cert pubkey: {err}")))?;
        let utxo_key = PublicKey::from_slice(&self.utxo_pub)
            .map_err(|err| CoinjoinError::BondInvalid(format!("utxo pubkey: {err}")))?;

        let nick_msg = format!("{}|{}", taker_nick, maker_nick);
        verify_signed_message(&cert_key, &self.nick_sig, nick_msg.as_bytes())
            .map_err(|_| CoinjoinError::BondInvalid("nick signature does not verify".into()))?;

        let raw_msg = cert_message(&self.cert_pub, self.cert_expiry, false);
        let hex_msg = cert_message(&self.cert_pub, self.cert_expiry, true);
        if verify_signed_message(&utxo_key, &self.cert_sig, &raw_msg).is_err()
            && verify_signed_message(&utxo_key, &self.cert_sig, &hex_msg).is_err()
        {
            return Err(CoinjoinError::BondInvalid("certificate signature does not verify".into()));
        }
        Ok(())
    }

    /// Build and sign a proof. `cert_key` signs the per-counterparty nick
    /// message; `utxo_key` signs the certificate (in self-signed hot-wallet
    /// use the two keys are the same).
    pub fn create(
        cert_key: &SecretKey,
        utxo_key: &SecretKey,
        maker_nick: &Nick,
        taker_nick: &Nick,
        cert_expiry: u16,
        bond_utxo: Outpoint,
        locktime: u32,
    ) -> Result<Self> {
        let secp = Secp256k1::new();
        let cert_pub = PublicKey::from_secret_key(&secp, cert_key).serialize();
        let utxo_pub = PublicKey::from_secret_key(&secp, utxo_key).serialize();

        let nick_msg = format!("{}|{}", taker_nick, maker_nick);
        let nick_sig = sign_message(cert_key, nick_msg.as_bytes());
        let cert_sig = sign_message(utxo_key, &cert_message(&cert_pub, cert_expiry, false));

        Ok(Self {
            nick_sig,
            cert_sig,
            cert_pub,
            cert_expiry,
            utxo_pub,
            txid: bond_utxo.txid,
            vout: bond_utxo.vout,
            locktime,
        })
    }
}

fn cert_message(cert_pub: &[u8; 33], cert_expiry: u16, hex_encoded: bool) -> Vec<u8> {
    let mut msg = CERT_MSG_PREFIX.to_vec();
    if hex_encoded {
        msg.extend_from_slice(hex::encode(cert_pub).as_bytes());
    } else {
        msg.extend_from_slice(cert_pub);
    }
    msg.push(b'|');
    // The signed expiry is decimal ascii, never the 2-byte wire encoding.
    msg.extend_from_slice(cert_expiry.to_string().as_bytes());
    msg
}

/// SHA256d over the Bitcoin signed-message envelope.
fn bitcoin_message_digest(message: &[u8]) -> [u8; 32] {
    let mut full = MESSAGE_MAGIC.to_vec();
    write_varint(&mut full, message.len() as u64);
    full.extend_from_slice(message);
    let first: [u8; 32] = Sha256::digest(&full).into();
    Sha256::digest(first).into()
}

fn sign_message(key: &SecretKey, message: &[u8]) -> Vec<u8> {
    let secp = Secp256k1::new();
    let digest = bitcoin_message_digest(message);
    secp.sign_ecdsa(&Message::from_digest(digest), key).serialize_der().to_vec()
}

fn verify_signed_message(key: &PublicKey, sig_der: &[u8], message: &[u8]) -> Result<()> {
    let secp = Secp256k1::new();
    let sig = Signature::from_der(sig_der).map_err(|_| CoinjoinError::SignatureInvalid)?;
    let digest = bitcoin_message_digest(message);
    secp.verify_ecdsa(&Message::from_digest(digest), &sig, key).map_err(|_| CoinjoinError::SignatureInvalid)
}

fn strip_sig_padding(slot: &[u8]) -> Result<Vec<u8>> {
    match slot.iter().position(|&b| b == 0x30) {
        Some(start) => Ok(slot[start..].to_vec()),
        None => Err(CoinjoinError::BondInvalid("signature slot has no DER header".into())),
    }
}

//! Typed views of the command arguments both engines exchange.
//!
//! Everything here is the plaintext layer: encrypted commands are boxed
//! *after* formatting and unboxed *before* parsing.

use crate::domain::bond::BondProof;
use crate::domain::podle::{self, PodleReveal};
use crate::foundation::util::encoding::parse_hex_array;
use crate::foundation::{CoinjoinError, Hash32, Outpoint, Result};
use crate::infrastructure::message::utxo::{format_utxo_list, parse_utxo_list, UtxoRef};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// `!fill <order_id> <amount> <taker_box_pub> <commitment>`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FillMsg {
    pub order_id: u64,
    pub amount: u64,
    pub taker_box_pub: [u8; 32],
    pub commitment: Hash32,
}

impl FillMsg {
    pub fn to_args(&self) -> String {
        format!(
            "{} {} {} P{}",
            self.order_id,
            self.amount,
            hex::encode(self.taker_box_pub),
            hex::encode(self.commitment)
        )
    }

    pub fn parse(args: &str) -> Result<Self> {
        let parts: Vec<&str> = args.split(' ').collect();
        if parts.len() != 4 {
            return Err(CoinjoinError::MalformedCommand(format!("fill has {} fields, expected 4", parts.len())));
        }
        Ok(Self {
            order_id: parts[0].parse().map_err(|_| CoinjoinError::MalformedCommand("fill order_id".into()))?,
            amount: parts[1].parse().map_err(|_| CoinjoinError::MalformedCommand("fill amount".into()))?,
            taker_box_pub: parse_hex_array::<32>(parts[2])
                .map_err(|_| CoinjoinError::MalformedCommand("fill box pubkey".into()))?,
            commitment: podle::parse_commitment(parts[3])?,
        })
    }
}

/// `!pubkey <maker_box_pub>`
pub fn pubkey_args(box_pub: &[u8; 32]) -> String {
    hex::encode(box_pub)
}

pub fn parse_pubkey_args(args: &str) -> Result<[u8; 32]> {
    parse_hex_array::<32>(args.trim()).map_err(|_| CoinjoinError::MalformedCommand("pubkey args".into()))
}

/// Plaintext of `!auth`: `<revelation> <taker_utxo_list> <cj_dest_hex>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthPayload {
    pub reveal: PodleReveal,
    pub utxos: Vec<UtxoRef>,
    pub cj_destination: Vec<u8>,
}

impl AuthPayload {
    pub fn to_plaintext(&self, reveal_wire: &str, extended: bool) -> String {
        format!("{} {} {}", reveal_wire, format_utxo_list(&self.utxos, extended), hex::encode(&self.cj_destination))
    }

    pub fn parse(plaintext: &str) -> Result<Self> {
        let parts: Vec<&str> = plaintext.split(' ').collect();
        if parts.len() != 3 {
            return Err(CoinjoinError::MalformedCommand(format!("auth has {} fields, expected 3", parts.len())));
        }
        Ok(Self {
            reveal: PodleReveal::parse(parts[0])?,
            utxos: parse_utxo_list(parts[1], false)?,
            cj_destination: hex::decode(parts[2]).map_err(|err| CoinjoinError::MalformedCommand(format!("auth cj destination: {err}")))?,
        })
    }
}

/// Plaintext of `!ioauth`:
/// `<maker_utxo_list> <cj_spk_hex> <change_spk_hex> <bond_b64|->`.
#[derive(Clone, Debug, PartialEq)]
pub struct IoauthPayload {
    pub utxos: Vec<UtxoRef>,
    pub cj_spk: Vec<u8>,
    pub change_spk: Vec<u8>,
    pub bond: Option<BondProof>,
}

impl IoauthPayload {
    pub fn to_plaintext(&self, extended: bool) -> Result<String> {
        let bond = match &self.bond {
            Some(proof) => proof.to_base64()?,
            None => "-".to_string(),
        };
        Ok(format!(
            "{} {} {} {}",
            format_utxo_list(&self.utxos, extended),
            hex::encode(&self.cj_spk),
            hex::encode(&self.change_spk),
            bond
        ))
    }

    pub fn parse(plaintext: &str) -> Result<Self> {
        let parts: Vec<&str> = plaintext.split(' ').collect();
        if parts.len() != 4 {
            return Err(CoinjoinError::MalformedCommand(format!("ioauth has {} fields, expected 4", parts.len())));
        }
        let bond = if parts[3] == "-" { None } else { Some(BondProof::from_base64(parts[3])?) };
        Ok(Self {
            utxos: parse_utxo_list(parts[0], false)?,
            cj_spk: hex::decode(parts[1]).map_err(|err| CoinjoinError::MalformedCommand(format!("ioauth cj spk: {err}")))?,
            change_spk: hex::decode(parts[2])
                .map_err(|err| CoinjoinError::MalformedCommand(format!("ioauth change spk: {err}")))?,
            bond,
        })
    }
}

/// Plaintext of `!tx` / clear args of `!push`: base64 raw transaction.
pub fn tx_payload(tx_bytes: &[u8]) -> String {
    BASE64.encode(tx_bytes)
}

pub fn parse_tx_payload(payload: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(payload.trim())?)
}

/// Plaintext of one `!sig`: `<outpoint> <witness_item_hex,...>`. One
/// message per maker input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigPayload {
    pub outpoint: Outpoint,
    pub witness: Vec<Vec<u8>>,
}

impl SigPayload {
    pub fn to_plaintext(&self) -> String {
        let items: Vec<String> = self.witness.iter().map(hex::encode).collect();
        format!("{} {}", self.outpoint, items.join(","))
    }

    pub fn parse(plaintext: &str) -> Result<Self> {
        let (outpoint, items) = plaintext
            .split_once(' ')
            .ok_or_else(|| CoinjoinError::MalformedCommand("sig payload missing separator".into()))?;
        let witness: Vec<Vec<u8>> = items
            .split(',')
            .filter(|item| !item.is_empty())
            .map(|item| hex::decode(item).map_err(|err| CoinjoinError::MalformedCommand(format!("sig witness: {err}"))))
            .collect::<Result<_>>()?;
        if witness.is_empty() {
            return Err(CoinjoinError::MalformedCommand("sig payload has no witness items".into()));
        }
        Ok(Self { outpoint: outpoint.parse()?, witness })
    }
}

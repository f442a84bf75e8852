//! UTXO reference formats used in `!auth` / `!ioauth` argument lists.
//!
//! Legacy form is `txid:vout`. When both sides advertised
//! `neutrino_compat` the extended form `txid:vout:scriptpubkey_hex:height`
//! rides along so a filter-based wallet can verify without an indexed
//! node. Lists are comma-separated.

use crate::foundation::{CoinjoinError, Outpoint, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRef {
    pub outpoint: Outpoint,
    pub script_pubkey: Option<Vec<u8>>,
    pub height: Option<u32>,
}

impl UtxoRef {
    pub fn legacy(outpoint: Outpoint) -> Self {
        Self { outpoint, script_pubkey: None, height: None }
    }

    pub fn extended(outpoint: Outpoint, script_pubkey: Vec<u8>, height: u32) -> Self {
        Self { outpoint, script_pubkey: Some(script_pubkey), height: Some(height) }
    }

    pub fn has_metadata(&self) -> bool {
        self.script_pubkey.is_some() && self.height.is_some()
    }

    pub fn to_legacy_str(&self) -> String {
        self.outpoint.to_string()
    }

    /// Extended form when the metadata is complete, legacy otherwise.
    pub fn to_extended_str(&self) -> String {
        match (&self.script_pubkey, self.height) {
            (Some(spk), Some(height)) => format!("{}:{}:{}", self.outpoint, hex::encode(spk), height),
            _ => self.to_legacy_str(),
        }
    }

    pub fn parse(field: &str) -> Result<Self> {
        let parts: Vec<&str> = field.split(':').collect();
        match parts.len() {
            2 => Ok(Self::legacy(field.parse()?)),
            4 => {
                let outpoint: Outpoint = format!("{}:{}", parts[0], parts[1]).parse()?;
                let script_pubkey = hex::decode(parts[2])
                    .map_err(|err| CoinjoinError::ParseError(format!("utxo scriptpubkey: {err}")))?;
                if script_pubkey.len() < 2 {
                    return Err(CoinjoinError::ParseError("utxo scriptpubkey too short".into()));
                }
                let height: u32 =
                    parts[3].parse().map_err(|_| CoinjoinError::ParseError(format!("utxo height: {}", parts[3])))?;
                Ok(Self::extended(outpoint, script_pubkey, height))
            }
            n => Err(CoinjoinError::ParseError(format!("utxo field has {n} parts, expected 2 or 4"))),
        }
    }
}

pub fn parse_utxo_list(list: &str, require_metadata: bool) -> Result<Vec<UtxoRef>> {
    if list.is_empty() {
        return Ok(Vec::new());
    }
    let utxos: Vec<UtxoRef> = list.split(',').map(UtxoRef::parse).collect::<Result<_>>()?;
    if require_metadata {
        if let Some(missing) = utxos.iter().find(|u| !u.has_metadata()) {
            return Err(CoinjoinError::ParseError(format!("utxo {} missing metadata", missing.outpoint)));
        }
    }
    Ok(utxos)
}

pub fn format_utxo_list(utxos: &[UtxoRef], extended: bool) -> String {
    utxos
        .iter()
        .map(|u| if extended { u.to_extended_str() } else { u.to_legacy_str() })
        .collect::<Vec<_>>()
        .join(",")
}

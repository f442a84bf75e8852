//! Maker-side verification of an unsigned CoinJoin transaction.
//!
//! The maker knows what it put in and what it was promised; the taker is
//! untrusted. Before producing any signature the maker checks, byte for
//! byte, that the transaction pays it what the offer said. Any failure is
//! a refusal: no partial signing, no second chances within the session.

use crate::domain::tx::Transaction;
use crate::foundation::Outpoint;
use std::collections::HashMap;
use thiserror::Error;

/// What the maker committed to during `!ioauth`, against which the `!tx`
/// payload is judged.
#[derive(Clone, Debug)]
pub struct MakerContract {
    pub my_utxos: Vec<Outpoint>,
    pub my_total_in: u64,
    pub cj_amount: u64,
    /// The maker's contribution to the mining fee.
    pub txfee_share: u64,
    /// The fee the taker owes this maker, fully resolved to satoshis.
    pub real_cjfee: u64,
    pub my_cj_spk: Vec<u8>,
    pub my_change_spk: Vec<u8>,
    pub dust_threshold: u64,
}

impl MakerContract {
    /// Expected change value. Negative means the inputs cannot cover the
    /// CoinJoin output, which is itself a refusal.
    pub fn expected_change(&self) -> i128 {
        i128::from(self.my_total_in) - i128::from(self.cj_amount) - i128::from(self.txfee_share)
            + i128::from(self.real_cjfee)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("transaction does not parse: {0}")]
    ParseFailed(String),

    #[error("own input {0} missing from transaction")]
    MissingUtxo(Outpoint),

    #[error("own input {0} appears {1} times")]
    DuplicateUtxo(Outpoint, usize),

    #[error("coinjoin output script appears {0} times, expected exactly 1")]
    CjOutputCount(usize),

    #[error("coinjoin output value {value} below promised {required}")]
    CjOutputTooSmall { value: u64, required: u64 },

    #[error("expected change {expected} but no change output present")]
    ChangeMissing { expected: u64 },

    #[error("change output script appears {0} times, expected at most 1")]
    ChangeDuplicate(usize),

    #[error("change output value {value} below expected {expected}")]
    ChangeTooSmall { value: u64, expected: u64 },

    #[error("change output present but expected change {expected} is dust")]
    UnexpectedChange { expected: i128 },

    #[error("inputs {total_in} cannot cover coinjoin amount {cj_amount} plus fee share")]
    InsufficientInputs { total_in: u64, cj_amount: u64 },

    #[error("no profit: cjfee {real_cjfee} does not exceed txfee share {txfee_share}")]
    NoProfit { real_cjfee: u64, txfee_share: u64 },
}

/// Accept iff every clause of the maker's contract holds. Returns the
/// parsed transaction so the caller can sign it without reparsing.
pub fn verify_unsigned_tx(tx_bytes: &[u8], contract: &MakerContract) -> Result<Transaction, VerifyError> {
    let tx = Transaction::parse(tx_bytes).map_err(|err| VerifyError::ParseFailed(err.to_string()))?;

    // Strict profit first: a contract that cannot pay is refused before
    // we bother with transaction structure.
    if contract.real_cjfee <= contract.txfee_share {
        return Err(VerifyError::NoProfit { real_cjfee: contract.real_cjfee, txfee_share: contract.txfee_share });
    }

    let mut input_counts: HashMap<Outpoint, usize> = HashMap::new();
    for input in &tx.inputs {
        *input_counts.entry(input.outpoint).or_insert(0) += 1;
    }
    for utxo in &contract.my_utxos {
        match input_counts.get(utxo).copied().unwrap_or(0) {
            0 => return Err(VerifyError::MissingUtxo(*utxo)),
            1 => {}
            n => return Err(VerifyError::DuplicateUtxo(*utxo, n)),
        }
    }

    let cj_matches: Vec<u64> =
        tx.outputs.iter().filter(|o| o.script_pubkey == contract.my_cj_spk).map(|o| o.value).collect();
    if cj_matches.len() != 1 {
        return Err(VerifyError::CjOutputCount(cj_matches.len()));
    }
    if cj_matches[0] < contract.cj_amount {
        return Err(VerifyError::CjOutputTooSmall { value: cj_matches[0], required: contract.cj_amount });
    }

    let expected = contract.expected_change();
    if expected < 0 {
        return Err(VerifyError::InsufficientInputs { total_in: contract.my_total_in, cj_amount: contract.cj_amount });
    }
    let change_matches: Vec<u64> =
        tx.outputs.iter().filter(|o| o.script_pubkey == contract.my_change_spk).map(|o| o.value).collect();

    if expected as u64 > contract.dust_threshold {
        match change_matches.len() {
            0 => return Err(VerifyError::ChangeMissing { expected: expected as u64 }),
            1 => {
                if change_matches[0] < expected as u64 {
                    return Err(VerifyError::ChangeTooSmall { value: change_matches[0], expected: expected as u64 });
                }
            }
            n => return Err(VerifyError::ChangeDuplicate(n)),
        }
    } else if !change_matches.is_empty() {
        // Dust-level change is forfeited to the miner; an output claiming
        // to be our change is someone playing games.
        return Err(VerifyError::UnexpectedChange { expected });
    }

    Ok(tx)
}

//! Unsigned CoinJoin transaction assembly (taker side).
//!
//! Inputs are the taker's plus every maker's; outputs are N+1 equal
//! CoinJoin outputs, per-party change where it clears dust, nothing
//! else. Input and output order is shuffled so position leaks nothing.

use crate::domain::tx::{estimate_vsize, Transaction, TxInput, TxOutput};
use crate::foundation::{CoinjoinError, Nick, Outpoint, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct MakerLeg {
    pub utxos: Vec<(Outpoint, u64)>,
    pub cj_spk: Vec<u8>,
    pub change_spk: Vec<u8>,
    /// Fee owed to this maker, resolved to satoshis.
    pub real_cjfee: u64,
    /// This maker's contribution toward the mining fee.
    pub txfee_contribution: u64,
}

impl MakerLeg {
    pub fn total_in(&self) -> u64 {
        self.utxos.iter().map(|(_, value)| value).sum()
    }
}

#[derive(Clone, Debug)]
pub struct BuildRequest {
    pub cj_amount: u64,
    pub taker_utxos: Vec<(Outpoint, u64)>,
    pub taker_cj_spk: Vec<u8>,
    pub taker_change_spk: Vec<u8>,
    pub makers: HashMap<Nick, MakerLeg>,
    /// Total mining fee for the transaction (the taker pays this minus
    /// the makers' contributions).
    pub tx_fee: u64,
    pub dust_threshold: u64,
}

#[derive(Clone, Debug)]
pub struct BuiltTx {
    pub tx: Transaction,
    /// Owner of each input, parallel to `tx.inputs`.
    pub input_owners: Vec<Nick>,
    pub taker_change: u64,
}

/// Fee for the whole transaction at `sat_per_vb`, from the reference
/// vsize estimate, rounded up.
pub fn estimate_tx_fee(num_inputs: usize, num_outputs: usize, sat_per_vb: u64) -> u64 {
    estimate_vsize(num_inputs, num_outputs) * sat_per_vb
}

pub fn build_unsigned<R: Rng>(request: &BuildRequest, taker_nick: &Nick, rng: &mut R) -> Result<BuiltTx> {
    if request.cj_amount < request.dust_threshold {
        return Err(CoinjoinError::Message(format!(
            "coinjoin amount {} below dust threshold {}",
            request.cj_amount, request.dust_threshold
        )));
    }

    let mut inputs: Vec<(TxInput, Nick)> = Vec::new();
    for (outpoint, _) in &request.taker_utxos {
        inputs.push((TxInput::new(*outpoint), taker_nick.clone()));
    }
    for (nick, leg) in &request.makers {
        for (outpoint, _) in &leg.utxos {
            inputs.push((TxInput::new(*outpoint), nick.clone()));
        }
    }

    let mut outputs: Vec<TxOutput> = Vec::new();
    outputs.push(TxOutput::new(request.cj_amount, request.taker_cj_spk.clone()));

    let total_maker_fee: u64 = request.makers.values().map(|leg| leg.real_cjfee).sum();
    let total_contribution: u64 = request.makers.values().map(|leg| leg.txfee_contribution).sum();
    let taker_fee_share = request.tx_fee.saturating_sub(total_contribution);

    for (nick, leg) in &request.makers {
        outputs.push(TxOutput::new(request.cj_amount, leg.cj_spk.clone()));

        // change = inputs - cj_amount - txfee_contribution + cjfee
        let change = i128::from(leg.total_in()) - i128::from(request.cj_amount)
            - i128::from(leg.txfee_contribution)
            + i128::from(leg.real_cjfee);
        if change < 0 {
            return Err(CoinjoinError::SessionAborted {
                nick: nick.to_string(),
                reason: format!("maker inputs {} cannot cover coinjoin amount", leg.total_in()),
            });
        }
        let change = change as u64;
        if change > request.dust_threshold {
            outputs.push(TxOutput::new(change, leg.change_spk.clone()));
        } else if change > 0 {
            log::warn!("maker {nick} change {change} at or below dust, forfeited to miners");
        }
    }

    let taker_in: u64 = request.taker_utxos.iter().map(|(_, value)| value).sum();
    let taker_change = i128::from(taker_in)
        - i128::from(request.cj_amount)
        - i128::from(total_maker_fee)
        - i128::from(taker_fee_share);
    if taker_change < 0 {
        return Err(CoinjoinError::Message(format!(
            "taker inputs {taker_in} insufficient: need {} more sat",
            -taker_change
        )));
    }
    let taker_change = taker_change as u64;
    if taker_change > request.dust_threshold {
        outputs.push(TxOutput::new(taker_change, request.taker_change_spk.clone()));
    } else if taker_change > 0 {
        log::warn!("taker change {taker_change} at or below dust, forfeited to miners");
    }

    inputs.shuffle(rng);
    outputs.shuffle(rng);

    let (tx_inputs, input_owners): (Vec<TxInput>, Vec<Nick>) = inputs.into_iter().unzip();
    Ok(BuiltTx {
        tx: Transaction::new_unsigned(tx_inputs, outputs),
        input_owners,
        taker_change: if taker_change > request.dust_threshold { taker_change } else { 0 },
    })
}

/// Attach witnesses collected from `!sig` messages (keyed by outpoint)
/// plus the taker's own. Every input must end up signed; a CoinJoin with
/// any unsigned input must never be broadcast.
pub fn attach_witnesses(tx: &Transaction, witnesses: &HashMap<Outpoint, Vec<Vec<u8>>>) -> Result<Transaction> {
    let mut stacks = Vec::with_capacity(tx.inputs.len());
    let mut missing = Vec::new();
    for input in &tx.inputs {
        match witnesses.get(&input.outpoint) {
            Some(stack) if !stack.is_empty() => stacks.push(stack.clone()),
            _ => missing.push(input.outpoint.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(CoinjoinError::Message(format!(
            "cannot assemble transaction: {} input(s) missing signatures: {}",
            missing.len(),
            missing.join(", ")
        )));
    }
    let mut signed = tx.clone();
    signed.witnesses = Some(stacks);
    Ok(signed)
}

//! Capability seams to the wallet and the chain.
//!
//! The core never talks to a node directly; it sees a `UtxoOracle` for
//! chain queries and broadcasting, and a `WalletSigner` for producing
//! input signatures. Backends (full node RPC, descriptor wallet, filter
//! client) implement these elsewhere.

use crate::domain::tx::Transaction;
use crate::foundation::{CoinjoinError, Outpoint, Result, Txid};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoEntry {
    pub script_pubkey: Vec<u8>,
    pub value: u64,
    /// Block height of confirmation; `None` while in the mempool.
    pub height: Option<u32>,
}

impl UtxoEntry {
    pub fn confirmations(&self, tip_height: u32) -> u32 {
        match self.height {
            Some(height) if height <= tip_height => tip_height - height + 1,
            _ => 0,
        }
    }
}

#[async_trait]
pub trait UtxoOracle: Send + Sync {
    /// `None` means the outpoint does not exist unspent.
    async fn get_utxo(&self, outpoint: &Outpoint) -> Result<Option<UtxoEntry>>;
    async fn broadcast(&self, tx_bytes: &[u8]) -> Result<Txid>;
    /// Fee estimate in sat/vB for confirmation within `target_blocks`.
    async fn estimate_fee(&self, target_blocks: u16) -> Result<u64>;
    async fn tip_height(&self) -> Result<u32>;
}

#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Witness stack (e.g. `[der_sig_with_sighash, pubkey]` for P2WPKH)
    /// for one of our inputs.
    async fn sign_input(&self, tx: &Transaction, input_index: usize, utxo: &UtxoEntry) -> Result<Vec<Vec<u8>>>;
}

/// In-memory oracle for tests and dry runs.
#[derive(Default)]
pub struct MockUtxoOracle {
    utxos: Mutex<HashMap<Outpoint, UtxoEntry>>,
    tip: AtomicU32,
    fee_sat_vb: AtomicU32,
    fail_broadcast: AtomicBool,
    broadcasts: Mutex<Vec<Vec<u8>>>,
}

impl MockUtxoOracle {
    pub fn new(tip_height: u32, fee_sat_vb: u32) -> Self {
        Self {
            tip: AtomicU32::new(tip_height),
            fee_sat_vb: AtomicU32::new(fee_sat_vb),
            ..Default::default()
        }
    }

    pub fn add_utxo(&self, outpoint: Outpoint, entry: UtxoEntry) {
        self.utxos.lock().unwrap_or_else(|err| err.into_inner()).insert(outpoint, entry);
    }

    pub fn remove_utxo(&self, outpoint: &Outpoint) {
        self.utxos.lock().unwrap_or_else(|err| err.into_inner()).remove(outpoint);
    }

    pub fn set_fail_broadcast(&self, fail: bool) {
        self.fail_broadcast.store(fail, Ordering::SeqCst);
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap_or_else(|err| err.into_inner()).len()
    }

    pub fn last_broadcast(&self) -> Option<Vec<u8>> {
        self.broadcasts.lock().unwrap_or_else(|err| err.into_inner()).last().cloned()
    }
}

#[async_trait]
impl UtxoOracle for MockUtxoOracle {
    async fn get_utxo(&self, outpoint: &Outpoint) -> Result<Option<UtxoEntry>> {
        Ok(self.utxos.lock().unwrap_or_else(|err| err.into_inner()).get(outpoint).cloned())
    }

    async fn broadcast(&self, tx_bytes: &[u8]) -> Result<Txid> {
        if self.fail_broadcast.load(Ordering::SeqCst) {
            return Err(CoinjoinError::BroadcastFailed("mock oracle set to fail".into()));
        }
        let tx = Transaction::parse(tx_bytes)?;
        self.broadcasts.lock().unwrap_or_else(|err| err.into_inner()).push(tx_bytes.to_vec());
        Ok(tx.txid())
    }

    async fn estimate_fee(&self, _target_blocks: u16) -> Result<u64> {
        Ok(u64::from(self.fee_sat_vb.load(Ordering::SeqCst)))
    }

    async fn tip_height(&self) -> Result<u32> {
        Ok(self.tip.load(Ordering::SeqCst))
    }
}

/// Deterministic fake signer: emits a DER-looking signature bound to the
/// txid and input index, plus a fake pubkey. Good enough for protocol
/// tests where signature validity is the counterparty's problem.
pub struct MockWalletSigner;

#[async_trait]
impl WalletSigner for MockWalletSigner {
    async fn sign_input(&self, tx: &Transaction, input_index: usize, _utxo: &UtxoEntry) -> Result<Vec<Vec<u8>>> {
        let txid = tx.txid();
        let mut sig = vec![0x30, 0x44, 0x02, 0x20];
        sig.extend_from_slice(&txid.as_bytes()[..16]);
        sig.push(input_index as u8);
        let pubkey = vec![0x02; 33];
        Ok(vec![sig, pubkey])
    }
}

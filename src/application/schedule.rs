//! Schedule (tumbler) mode: a sequence of coinjoins with rotating
//! destinations and waits in between, breaking the link between an
//! origin and a final destination across several hops.

use crate::application::taker::{CoinjoinRequest, RunOutcome, TakerEngine};
use crate::domain::offer::OfferKind;
use crate::foundation::{CoinjoinError, Outpoint, Result};
use std::time::Duration;

/// One schedule row. Amounts are either absolute or a fraction of the
/// mixdepth balance; resolving fractions is the wallet's job, so by the
/// time a row reaches the engine the amount is concrete.
#[derive(Clone, Debug)]
pub struct ScheduleEntry {
    pub mixdepth: u32,
    pub amount: u64,
    pub counterparty_count: usize,
    pub destination: Vec<u8>,
    pub change_destination: Vec<u8>,
    pub wait_secs: u64,
    pub taker_utxos: Vec<Outpoint>,
    pub podle_key: [u8; 32],
    pub podle_utxo: Outpoint,
}

#[derive(Clone, Debug)]
pub struct ScheduleReport {
    pub completed: Vec<RunOutcome>,
}

/// Run the schedule sequentially. Each entry re-polls the orderbook (a
/// fresh DISCOVER inside the run); a failed entry aborts the remainder,
/// since later hops assume earlier outputs exist.
pub async fn run_schedule(engine: &mut TakerEngine, entries: &[ScheduleEntry]) -> Result<ScheduleReport> {
    let mut completed = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        log::info!(
            "schedule entry {index}: mixdepth {} amount {} with {} counterparties",
            entry.mixdepth,
            entry.amount,
            entry.counterparty_count
        );
        let request = CoinjoinRequest {
            amount: entry.amount,
            taker_utxos: entry.taker_utxos.clone(),
            cj_destination: entry.destination.clone(),
            change_destination: entry.change_destination.clone(),
            podle_key: entry.podle_key,
            podle_utxo: entry.podle_utxo,
            offer_kind: None::<OfferKind>,
        };
        match engine.run(request).await {
            Ok(outcome) => completed.push(outcome),
            Err(err) => {
                log::error!("schedule aborted at entry {index}: {err}");
                return Err(CoinjoinError::Message(format!(
                    "schedule aborted at entry {index} after {} completed hops: {err}",
                    completed.len()
                )));
            }
        }
        if entry.wait_secs > 0 && index + 1 < entries.len() {
            tokio::time::sleep(Duration::from_secs(entry.wait_secs)).await;
        }
    }
    Ok(ScheduleReport { completed })
}

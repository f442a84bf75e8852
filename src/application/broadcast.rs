//! Broadcast policy: who pushes the final transaction to the network.
//!
//! Pushing through a maker decouples the taker's network identity from
//! the transaction announcement. Peer failures fall back to local
//! broadcast, except under `NotSelf` where local broadcast is forbidden.

use crate::domain::nick::NickIdentity;
use crate::domain::tx::Transaction;
use crate::foundation::{commands, CoinjoinError, Nick, Result, Txid};
use crate::infrastructure::config::BroadcastPolicy;
use crate::infrastructure::message::command;
use crate::infrastructure::message::envelope::{Envelope, EnvelopeType};
use crate::infrastructure::oracle::UtxoOracle;
use crate::infrastructure::transport::MessageChannel;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Number of makers a `MultiplePeers` broadcast fans out to.
const PUSH_FANOUT: usize = 3;

#[allow(clippy::too_many_arguments)]
pub async fn broadcast_transaction<R: Rng>(
    tx: &Transaction,
    policy: BroadcastPolicy,
    peers: &[(Nick, String)],
    oracle: &dyn UtxoOracle,
    identity: &NickIdentity,
    channels: &HashMap<String, Arc<dyn MessageChannel>>,
    rng: &mut R,
) -> Result<Txid> {
    let tx_bytes = tx.serialize();
    let local_txid = tx.txid();

    match policy {
        BroadcastPolicy::Self_ => {
            let txid = oracle.broadcast(&tx_bytes).await?;
            log::info!("broadcast locally: {txid}");
            Ok(txid)
        }
        BroadcastPolicy::RandomPeer | BroadcastPolicy::MultiplePeers | BroadcastPolicy::NotSelf => {
            let fanout = if policy == BroadcastPolicy::RandomPeer { 1 } else { PUSH_FANOUT };
            let mut shuffled: Vec<&(Nick, String)> = peers.iter().collect();
            shuffled.shuffle(rng);

            let mut pushed = 0usize;
            for (nick, hostid) in shuffled.into_iter().take(fanout) {
                match push_to_peer(&tx_bytes, nick, hostid, identity, channels).await {
                    Ok(()) => {
                        log::info!("pushed transaction to {nick}");
                        pushed += 1;
                    }
                    Err(err) => log::warn!("push to {nick} failed: {err}"),
                }
            }
            if pushed > 0 {
                return Ok(local_txid);
            }
            if policy == BroadcastPolicy::NotSelf {
                return Err(CoinjoinError::BroadcastFailed("no peer accepted the push and policy forbids self".into()));
            }
            log::warn!("all peer pushes failed; falling back to local broadcast");
            let txid = oracle.broadcast(&tx_bytes).await?;
            Ok(txid)
        }
    }
}

async fn push_to_peer(
    tx_bytes: &[u8],
    nick: &Nick,
    hostid: &str,
    identity: &NickIdentity,
    channels: &HashMap<String, Arc<dyn MessageChannel>>,
) -> Result<()> {
    let channel = channels
        .get(hostid)
        .ok_or_else(|| CoinjoinError::transport("push", format!("no channel for hostid {hostid}")))?;
    let msg =
        command::AppMessage::new(identity.nick().clone(), nick.clone(), commands::PUSH, BASE64.encode(tx_bytes));
    let line = command::format_signed(&msg, identity, hostid);
    channel.send(Envelope::new(EnvelopeType::Privmsg, line)).await
}

//! Maker session engine.
//!
//! Passive side of the protocol: announce offers, answer `!fill`, verify
//! PoDLE at `!auth`, and sign at `!tx` only after the transaction passes
//! the byte-level verifier. Every session is isolated; a misbehaving
//! taker costs the maker nothing but a blacklisted commitment entry.

use crate::application::protocol::{parse_tx_payload, pubkey_args, AuthPayload, FillMsg, IoauthPayload, SigPayload};
use crate::domain::bond::BondProof;
use crate::domain::nick::NickIdentity;
use crate::domain::offer::Offer;
use crate::domain::podle;
use crate::domain::session::{MakerPhase, SessionCore};
use crate::domain::tx::is_p2wsh;
use crate::domain::verifier::{verify_unsigned_tx, MakerContract};
use crate::foundation::{commands, now_secs, CoinjoinError, Nick, Outpoint, Result, PUBLIC_NICK};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::message::envelope::{Envelope, EnvelopeType};
use crate::infrastructure::message::{boxer, command, dedup};
use crate::infrastructure::oracle::{UtxoEntry, UtxoOracle, WalletSigner};
use crate::infrastructure::rate_limit::{MessageLimiter, OrderbookLimiter, RateLimitAction};
use crate::infrastructure::storage::{BlacklistHandle, NickStateFile};
use crate::infrastructure::transport::{Incoming, MessageChannel};
use secp256k1::SecretKey;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// The wallet-facing facts a maker brings to every coinjoin: which
/// UTXOs it offers and where its outputs go.
#[derive(Clone, Debug)]
pub struct MakerWalletProfile {
    pub utxos: Vec<Outpoint>,
    pub cj_spk: Vec<u8>,
    pub change_spk: Vec<u8>,
}

/// Key material for advertising a fidelity bond. The certificate key is
/// hot; the UTXO key may have signed the certificate long ago and gone
/// back to cold storage.
#[derive(Clone)]
pub struct BondIdentity {
    pub cert_key: SecretKey,
    pub utxo_key: SecretKey,
    pub cert_expiry: u16,
    pub bond_utxo: Outpoint,
    pub locktime: u32,
}

impl BondIdentity {
    fn proof_for(&self, maker: &Nick, taker: &Nick) -> Result<BondProof> {
        BondProof::create(&self.cert_key, &self.utxo_key, maker, taker, self.cert_expiry, self.bond_utxo, self.locktime)
    }
}

struct MakerSession {
    core: SessionCore,
    phase: MakerPhase,
    amount: u64,
    /// Inputs pledged at `!ioauth`, verified again at `!tx`.
    pledged: Vec<(Outpoint, UtxoEntry)>,
}

impl MakerSession {
    fn advance(&mut self, target: MakerPhase) -> Result<()> {
        if !self.phase.can_transition_to(target) {
            return Err(CoinjoinError::PhaseViolation {
                from: self.phase.label().to_string(),
                to: target.label().to_string(),
            });
        }
        self.phase = target;
        Ok(())
    }
}

pub struct MakerEngine {
    identity: NickIdentity,
    channels: HashMap<String, Arc<dyn MessageChannel>>,
    oracle: Arc<dyn UtxoOracle>,
    wallet: Arc<dyn WalletSigner>,
    blacklist: BlacklistHandle,
    config: AppConfig,
    offer: Offer,
    profile: MakerWalletProfile,
    bond: Option<BondIdentity>,
    sessions: HashMap<Nick, MakerSession>,
    limiter: MessageLimiter,
    orderbook_limiter: OrderbookLimiter,
    broadcast_dedup: dedup::DedupWindow<dedup::BroadcastFingerprint>,
    nick_state: Option<NickStateFile>,
}

impl MakerEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: NickIdentity,
        channels: Vec<Arc<dyn MessageChannel>>,
        oracle: Arc<dyn UtxoOracle>,
        wallet: Arc<dyn WalletSigner>,
        blacklist: BlacklistHandle,
        config: AppConfig,
        offer: Offer,
        profile: MakerWalletProfile,
        bond: Option<BondIdentity>,
    ) -> Self {
        let limiter = MessageLimiter::new(
            config.limits.message_rate_limit,
            config.limits.message_burst_limit,
            Some(config.limits.message_burst_limit as u32),
        );
        Self {
            identity,
            channels: channels.into_iter().map(|c| (c.hostid().to_string(), c)).collect(),
            oracle,
            wallet,
            blacklist,
            config,
            offer,
            profile,
            bond,
            sessions: HashMap::new(),
            limiter,
            orderbook_limiter: OrderbookLimiter::new(),
            broadcast_dedup: dedup::broadcast_window(),
            nick_state: None,
        }
    }

    /// Register the process state directory: writes `state/maker.nick`
    /// so the operator's taker process can exclude this maker from its
    /// own selection. Removed again when `serve` winds down.
    pub fn bind_state_dir(&mut self, dir: &Path) -> Result<()> {
        self.nick_state = Some(NickStateFile::write(dir, "maker", self.identity.nick())?);
        Ok(())
    }

    pub fn nick(&self) -> &Nick {
        self.identity.nick()
    }

    pub fn session_phase(&self, taker: &Nick) -> Option<MakerPhase> {
        self.sessions.get(taker).map(|s| s.phase)
    }

    /// Announce the standing offer on every attached channel.
    pub async fn announce_offers(&self) -> Result<()> {
        let msg = command::AppMessage::new(
            self.identity.nick().clone(),
            Nick::new(PUBLIC_NICK),
            self.offer_command(),
            self.offer.to_wire_args(),
        );
        for channel in self.channels.values() {
            channel.send(Envelope::new(EnvelopeType::Pubmsg, msg.format())).await?;
        }
        Ok(())
    }

    fn offer_command(&self) -> &'static str {
        match self.offer.kind {
            crate::domain::offer::OfferKind::Relative => commands::RELOFFER,
            crate::domain::offer::OfferKind::Absolute => commands::ABSOFFER,
        }
    }

    /// One envelope in. Errors from a single session are handled inside;
    /// an `Err` here means the envelope itself was hostile.
    pub async fn handle_incoming(&mut self, incoming: Incoming) -> Result<()> {
        match incoming.envelope.kind {
            EnvelopeType::Pubmsg => {
                let msg = command::AppMessage::parse(&incoming.envelope.line)?;
                if msg.from == *self.identity.nick() {
                    return Ok(());
                }
                let fingerprint = dedup::broadcast_fingerprint(&msg.from, &msg.command, &msg.args);
                if !self.broadcast_dedup.observe(fingerprint, now_secs()) {
                    return Ok(());
                }
                match msg.command.as_str() {
                    commands::ORDERBOOK => self.on_orderbook(&msg.from, &incoming.hostid).await?,
                    commands::HP2 => {
                        // network-propagated blacklist entry
                        if let Ok(commitment) = podle::parse_commitment(msg.args.trim()) {
                            self.blacklist.append(commitment).await?;
                        }
                    }
                    _ => {}
                }
                Ok(())
            }
            EnvelopeType::Privmsg => {
                let msg = command::parse_signed(&incoming.envelope.line, &incoming.hostid)?;
                if msg.to != *self.identity.nick() {
                    return Ok(());
                }
                match self.limiter.check(msg.from.as_str()) {
                    RateLimitAction::Allow => {}
                    RateLimitAction::Delay => {
                        log::warn!("rate limiting {}; dropping {}", msg.from, msg.command);
                        return Ok(());
                    }
                    RateLimitAction::Disconnect => {
                        self.sessions.remove(&msg.from);
                        return Err(CoinjoinError::RateLimited { nick: msg.from.to_string() });
                    }
                }
                let from = msg.from.clone();
                let result = self.dispatch(&msg, &incoming.hostid).await;
                if let Err(err) = result {
                    log::warn!("session with {from} failed: {err} (code {:?})", err.code());
                    self.fail_session(&from, &incoming.hostid, &err).await;
                }
                Ok(())
            }
            EnvelopeType::Ping => {
                if let Some(channel) = self.channels.get(&incoming.hostid) {
                    channel.send(Envelope::new(EnvelopeType::Pong, "")).await?;
                }
                Ok(())
            }
            // Handshake traffic is handled at connect time; the rest do
            // not concern the engine.
            _ => Ok(()),
        }
    }

    async fn dispatch(&mut self, msg: &command::AppMessage, hostid: &str) -> Result<()> {
        match msg.command.as_str() {
            commands::FILL => self.on_fill(&msg.from, &msg.args, hostid).await,
            commands::AUTH => self.on_auth(&msg.from, &msg.args, hostid).await,
            commands::TX => self.on_tx(&msg.from, &msg.args, hostid).await,
            commands::PUSH => self.on_push(&msg.from, &msg.args).await,
            commands::ERROR => {
                log::info!("taker {} reported error: {}", msg.from, msg.args);
                self.sessions.remove(&msg.from);
                Ok(())
            }
            other => Err(CoinjoinError::MalformedCommand(format!("unexpected command !{other}"))),
        }
    }

    async fn on_orderbook(&mut self, from: &Nick, hostid: &str) -> Result<()> {
        if !self.orderbook_limiter.check(from.as_str(), now_secs()) {
            log::warn!("orderbook rate limit hit by {from} ({} violations)", self.orderbook_limiter.violation_count(from.as_str()));
            return Ok(());
        }
        // offer goes back over the channel the request came in on
        self.send_private(from, self.offer_command(), &self.offer.to_wire_args(), hostid).await?;
        if let Some(bond) = &self.bond {
            let proof = bond.proof_for(self.identity.nick(), from)?;
            self.send_private(from, commands::TBOND, &proof.to_base64()?, hostid).await?;
        }
        Ok(())
    }

    async fn on_fill(&mut self, from: &Nick, args: &str, hostid: &str) -> Result<()> {
        let fill = FillMsg::parse(args)?;
        if fill.order_id != self.offer.order_id {
            return Err(CoinjoinError::ProtocolViolation(format!("unknown order id {}", fill.order_id)));
        }
        if !self.offer.brackets(fill.amount) {
            return Err(CoinjoinError::ProtocolViolation(format!(
                "amount {} outside [{}, {}]",
                fill.amount, self.offer.min_size, self.offer.max_size
            )));
        }
        if self.blacklist.contains(fill.commitment).await? {
            return Err(CoinjoinError::CommitmentReused(hex::encode(fill.commitment)));
        }

        let (box_secret, box_public) = boxer::generate_keypair();
        let mut core = SessionCore::new(from.clone(), box_secret, box_public, now_secs());
        core.their_box_public = Some(fill.taker_box_pub);
        core.commitment = Some(fill.commitment);

        let mut session = MakerSession { core, phase: MakerPhase::Idle, amount: fill.amount, pledged: Vec::new() };
        session.advance(MakerPhase::Filled)?;
        // a fresh !fill from the same taker replaces any earlier session
        self.sessions.insert(from.clone(), session);

        log::info!("fill from {from}: amount {} order {}", fill.amount, fill.order_id);
        let args = pubkey_args(&box_public);
        self.send_private(from, commands::PUBKEY, &args, hostid).await
    }

    async fn on_auth(&mut self, from: &Nick, args: &str, hostid: &str) -> Result<()> {
        let session = self
            .sessions
            .get_mut(from)
            .ok_or_else(|| CoinjoinError::ProtocolViolation("auth without fill".into()))?;
        if !session.phase.can_transition_to(MakerPhase::Authed) {
            return Err(CoinjoinError::PhaseViolation {
                from: session.phase.label().to_string(),
                to: MakerPhase::Authed.label().to_string(),
            });
        }
        session.core.pin_channel(hostid)?;

        let their_pub = session.core.their_box_public()?;
        let plaintext = boxer::open(args.trim(), &session.core.box_secret, &their_pub)?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| CoinjoinError::DecryptFailed)?;
        let auth = AuthPayload::parse(&plaintext)?;

        let commitment = session
            .core
            .commitment
            .ok_or_else(|| CoinjoinError::ProtocolViolation("session has no commitment".into()))?;
        let index = podle::verify(&auth.reveal, &commitment, &self.config.maker.accepted_podle_indices)?;
        session.core.podle_index = index;

        // The commitment is consumed: blacklist locally and tell the
        // world. Another maker in the same run may have broadcast it
        // already (every maker sees the same commitment), so a duplicate
        // append here is normal; reuse is policed at !fill time.
        if self.blacklist.append(commitment).await? {
            self.broadcast_public(commands::HP2, &format!("P{}", hex::encode(commitment))).await?;
        }

        // taker must have real skin in the game
        let taker_utxo = auth.reveal.utxo;
        let entry = self
            .oracle
            .get_utxo(&taker_utxo)
            .await?
            .ok_or(CoinjoinError::UtxoMissing { outpoint: taker_utxo.to_string() })?;
        let tip = self.oracle.tip_height().await?;
        let confirmations = entry.confirmations(tip);
        if confirmations < self.config.maker.taker_utxo_age {
            return Err(CoinjoinError::UtxoImmature {
                outpoint: taker_utxo.to_string(),
                confirmations,
                required: self.config.maker.taker_utxo_age,
            });
        }
        let session = self
            .sessions
            .get_mut(from)
            .ok_or_else(|| CoinjoinError::ProtocolViolation("session vanished during auth".into()))?;
        let required = session.amount * u64::from(self.config.maker.taker_utxo_amtpercent) / 100;
        if entry.value < required {
            return Err(CoinjoinError::UtxoValueLow { value: entry.value, required });
        }

        // pledge inputs; fidelity-bond (P2WSH) coins never enter a coinjoin
        let mut pledged = Vec::new();
        for outpoint in &self.profile.utxos {
            match self.oracle.get_utxo(outpoint).await? {
                Some(entry) if is_p2wsh(&entry.script_pubkey) => {
                    log::debug!("skipping P2WSH utxo {outpoint}");
                }
                Some(entry) => pledged.push((*outpoint, entry)),
                None => log::warn!("own utxo {outpoint} disappeared, skipping"),
            }
        }
        if pledged.is_empty() {
            return Err(CoinjoinError::WalletUnavailable("no spendable utxos to pledge".into()));
        }

        let bond = match &self.bond {
            Some(identity) => Some(identity.proof_for(self.identity.nick(), from)?),
            None => None,
        };
        let payload = IoauthPayload {
            utxos: pledged.iter().map(|(op, _)| crate::infrastructure::message::utxo::UtxoRef::legacy(*op)).collect(),
            cj_spk: self.profile.cj_spk.clone(),
            change_spk: self.profile.change_spk.clone(),
            bond,
        };
        let plaintext = payload.to_plaintext(false)?;

        let session = self
            .sessions
            .get_mut(from)
            .ok_or_else(|| CoinjoinError::ProtocolViolation("session vanished during auth".into()))?;
        session.pledged = pledged;
        session.advance(MakerPhase::Authed)?;
        let sealed = boxer::seal(plaintext.as_bytes(), &session.core.box_secret, &their_pub)?;
        log::info!("authed {from} (podle index {index}); pledged {} inputs", session.pledged.len());
        self.send_private(from, commands::IOAUTH, &sealed, hostid).await
    }

    async fn on_tx(&mut self, from: &Nick, args: &str, hostid: &str) -> Result<()> {
        let session = self
            .sessions
            .get_mut(from)
            .ok_or_else(|| CoinjoinError::ProtocolViolation("tx without session".into()))?;
        if !session.phase.can_transition_to(MakerPhase::Signed) {
            return Err(CoinjoinError::PhaseViolation {
                from: session.phase.label().to_string(),
                to: MakerPhase::Signed.label().to_string(),
            });
        }
        session.core.pin_channel(hostid)?;

        let their_pub = session.core.their_box_public()?;
        let plaintext = boxer::open(args.trim(), &session.core.box_secret, &their_pub)?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| CoinjoinError::DecryptFailed)?;
        let tx_bytes = parse_tx_payload(&plaintext)?;

        let contract = MakerContract {
            my_utxos: session.pledged.iter().map(|(op, _)| *op).collect(),
            my_total_in: session.pledged.iter().map(|(_, e)| e.value).sum(),
            cj_amount: session.amount,
            txfee_share: self.offer.txfee_contribution,
            real_cjfee: self.offer.real_cjfee(session.amount),
            my_cj_spk: self.profile.cj_spk.clone(),
            my_change_spk: self.profile.change_spk.clone(),
            dust_threshold: self.config.coinjoin.dust_threshold,
        };
        let tx = verify_unsigned_tx(&tx_bytes, &contract)
            .map_err(|reason| CoinjoinError::VerifyRefused(reason.to_string()))?;

        session.advance(MakerPhase::Signed)?;
        let pledged = session.pledged.clone();
        let box_secret = session.core.box_secret;

        let mut signatures = Vec::with_capacity(pledged.len());
        for (outpoint, entry) in &pledged {
            if is_p2wsh(&entry.script_pubkey) {
                return Err(CoinjoinError::SigningRefused(format!("{outpoint} is a P2WSH (bond) output")));
            }
            let index = tx
                .inputs
                .iter()
                .position(|input| input.outpoint == *outpoint)
                .ok_or_else(|| CoinjoinError::SigningRefused(format!("own input {outpoint} vanished after verify")))?;
            let witness = self.wallet.sign_input(&tx, index, entry).await?;
            signatures.push(SigPayload { outpoint: *outpoint, witness });
        }

        for sig in &signatures {
            let sealed = boxer::seal(sig.to_plaintext().as_bytes(), &box_secret, &their_pub)?;
            self.send_private(from, commands::SIG, &sealed, hostid).await?;
        }

        let session = self
            .sessions
            .get_mut(from)
            .ok_or_else(|| CoinjoinError::ProtocolViolation("session vanished during signing".into()))?;
        session.advance(MakerPhase::Done)?;
        log::info!("signed {} inputs for {from}", signatures.len());
        Ok(())
    }

    async fn on_push(&mut self, from: &Nick, args: &str) -> Result<()> {
        let tx_bytes = parse_tx_payload(args)?;
        let txid = self.oracle.broadcast(&tx_bytes).await?;
        log::info!("pushed transaction {txid} for {from}");
        Ok(())
    }

    /// Abort expired sessions. Called from the serve loop's sweep tick.
    pub fn sweep_expired(&mut self, now: u64) -> Vec<Nick> {
        let timeout = self.config.timeouts.session_timeout_sec;
        let expired: Vec<Nick> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.phase.is_terminal() && s.core.is_expired(now, timeout))
            .map(|(nick, _)| nick.clone())
            .collect();
        for nick in &expired {
            if let Some(session) = self.sessions.get_mut(nick) {
                let _ = session.advance(MakerPhase::TimedOut);
                log::info!("session with {nick} timed out");
            }
            self.sessions.remove(nick);
        }
        expired
    }

    async fn fail_session(&mut self, nick: &Nick, hostid: &str, err: &CoinjoinError) {
        if let Some(mut session) = self.sessions.remove(nick) {
            let _ = session.advance(MakerPhase::Aborted);
        }
        let args = format!("{:?}", err.code());
        if let Err(send_err) = self.send_private(nick, commands::ERROR, &args, hostid).await {
            log::debug!("could not deliver !error to {nick}: {send_err}");
        }
    }

    async fn send_private(&self, to: &Nick, cmd: &str, args: &str, hostid: &str) -> Result<()> {
        let channel = self
            .channels
            .get(hostid)
            .ok_or_else(|| CoinjoinError::transport("send", format!("no channel for hostid {hostid}")))?;
        let msg = command::AppMessage::new(self.identity.nick().clone(), to.clone(), cmd, args);
        let line = command::format_signed(&msg, &self.identity, hostid);
        channel.send(Envelope::new(EnvelopeType::Privmsg, line)).await
    }

    async fn broadcast_public(&self, cmd: &str, args: &str) -> Result<()> {
        let msg = command::AppMessage::new(self.identity.nick().clone(), Nick::new(PUBLIC_NICK), cmd, args);
        for channel in self.channels.values() {
            channel.send(Envelope::new(EnvelopeType::Pubmsg, msg.format())).await?;
        }
        Ok(())
    }

    /// Event loop: envelopes in, periodic timeout sweep.
    pub async fn serve(mut self, mut inbox: tokio::sync::mpsc::Receiver<Incoming>) {
        let mut sweep = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            tokio::select! {
                maybe = inbox.recv() => match maybe {
                    Some(incoming) => {
                        if let Err(err) = self.handle_incoming(incoming).await {
                            log::warn!("dropping hostile envelope: {err}");
                        }
                    }
                    None => break,
                },
                _ = sweep.tick() => {
                    self.sweep_expired(now_secs());
                }
            }
        }
        // clean shutdown: stop advertising this nick to the sibling taker
        if let Some(file) = self.nick_state.take() {
            if let Err(err) = file.remove() {
                log::warn!("could not remove nick state file: {err}");
            }
        }
    }
}

//! Taker session engine: drives one CoinJoin run end to end.
//!
//! One outer run, one session per maker. Makers that stall or misbehave
//! are added to the run's ignore set; the run restarts with replacements
//! (and the next PoDLE index) until it completes or the replacement
//! budget is spent. A failed session never takes another down with it.

use crate::application::broadcast::broadcast_transaction;
use crate::application::builder::{attach_witnesses, build_unsigned, estimate_tx_fee, BuildRequest, MakerLeg};
use crate::application::protocol::{
    parse_pubkey_args, tx_payload, AuthPayload, FillMsg, IoauthPayload, SigPayload,
};
use crate::domain::commitment::CommitmentRecord;
use crate::domain::nick::NickIdentity;
use crate::domain::offer::Offer;
use crate::domain::orderbook::Orderbook;
use crate::domain::peer::{self, DirectoryPresence, PeerLocation, PeerRegistry};
use crate::domain::podle::{self, Podle, PodleReveal};
use crate::domain::selection::{dedupe_cheapest, filter_offers, select_makers, BondScorer, OfferQuery, SelectionPolicy};
use crate::domain::session::{SessionCore, TakerPhase};
use crate::domain::tx::Transaction;
use crate::foundation::{commands, now_secs, CoinjoinError, Nick, Outpoint, Result, Txid, PUBLIC_NICK};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::message::envelope::{Envelope, EnvelopeType};
use crate::infrastructure::message::utxo::UtxoRef;
use crate::infrastructure::message::{boxer, command, dedup};
use crate::infrastructure::oracle::{UtxoOracle, WalletSigner};
use crate::infrastructure::storage::{HistoryLog, HistoryRow, NickStateFile, TakerCommitmentStore};
use crate::infrastructure::transport::{Incoming, MessageChannel};
use crate::domain::bond::BondProof;
use crate::domain::offer::OfferKind;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// What the wallet asks the engine to do.
#[derive(Clone, Debug)]
pub struct CoinjoinRequest {
    pub amount: u64,
    pub taker_utxos: Vec<Outpoint>,
    pub cj_destination: Vec<u8>,
    pub change_destination: Vec<u8>,
    /// Private key and outpoint backing the PoDLE commitment.
    pub podle_key: [u8; 32],
    pub podle_utxo: Outpoint,
    /// Restrict selection to one offer kind, if desired.
    pub offer_kind: Option<OfferKind>,
}

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub txid: Txid,
    pub tx: Transaction,
    pub makers: Vec<Nick>,
}

struct TakerSession {
    core: SessionCore,
    offer: Offer,
    hostid: String,
    /// Maker inputs with oracle-verified values, known after `!ioauth`.
    maker_utxos: Vec<(Outpoint, u64)>,
    ioauth: Option<IoauthPayload>,
    sigs: HashMap<Outpoint, Vec<Vec<u8>>>,
}

pub struct TakerEngine {
    identity: NickIdentity,
    channels: HashMap<String, Arc<dyn MessageChannel>>,
    inbox: mpsc::Receiver<Incoming>,
    oracle: Arc<dyn UtxoOracle>,
    wallet: Arc<dyn WalletSigner>,
    scorer: Arc<dyn BondScorer>,
    policy: SelectionPolicy,
    config: AppConfig,
    commitments: TakerCommitmentStore,
    history: Option<HistoryLog>,
    registry: PeerRegistry,
    presence: DirectoryPresence,
    orderbook: Orderbook,
    broadcast_dedup: dedup::DedupWindow<dedup::BroadcastFingerprint>,
    response_dedup: dedup::DedupWindow<dedup::ResponseFingerprint>,
    maker_hostids: HashMap<Nick, String>,
    ignored: HashSet<Nick>,
    state_dir: Option<PathBuf>,
    nick_state: Option<NickStateFile>,
    phase: TakerPhase,
    rng: StdRng,
}

impl TakerEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: NickIdentity,
        channels: Vec<Arc<dyn MessageChannel>>,
        inbox: mpsc::Receiver<Incoming>,
        oracle: Arc<dyn UtxoOracle>,
        wallet: Arc<dyn WalletSigner>,
        scorer: Arc<dyn BondScorer>,
        config: AppConfig,
        commitments: TakerCommitmentStore,
        history: Option<HistoryLog>,
    ) -> Self {
        let max_offer_age = config.timeouts.max_offer_age;
        let bond_numerator = config.coinjoin.bond_weighted_numerator;
        Self {
            identity,
            channels: channels.into_iter().map(|c| (c.hostid().to_string(), c)).collect(),
            inbox,
            oracle,
            wallet,
            scorer,
            policy: SelectionPolicy::FidelityBondWeighted { bond_numerator },
            config,
            commitments,
            history,
            registry: PeerRegistry::new(),
            presence: DirectoryPresence::new(),
            orderbook: Orderbook::new(max_offer_age),
            broadcast_dedup: dedup::broadcast_window(),
            response_dedup: dedup::response_window(),
            maker_hostids: HashMap::new(),
            ignored: HashSet::new(),
            state_dir: None,
            nick_state: None,
            phase: TakerPhase::Idle,
            rng: StdRng::from_entropy(),
        }
    }

    /// Register the process state directory: writes `state/taker.nick`
    /// for sibling processes to read, and makes selection exclude the
    /// operator's own maker nick from `state/maker.nick` when present.
    pub fn bind_state_dir(&mut self, dir: &Path) -> Result<()> {
        self.nick_state = Some(NickStateFile::write(dir, "taker", self.identity.nick())?);
        self.state_dir = Some(dir.to_path_buf());
        Ok(())
    }

    /// Clean shutdown: delete the nick state file. A crash leaves it
    /// behind, which is harmless (selection only ever over-excludes).
    pub fn shutdown(&mut self) -> Result<()> {
        match self.nick_state.take() {
            Some(file) => file.remove(),
            None => Ok(()),
        }
    }

    /// Override the selection policy (default is bond-weighted).
    pub fn set_selection_policy(&mut self, policy: SelectionPolicy) {
        self.policy = policy;
    }

    /// Exclude a nick from selection for this process (e.g. the
    /// operator's own maker nick from the state file).
    pub fn ignore_nick(&mut self, nick: Nick) {
        self.ignored.insert(nick);
    }

    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn nick(&self) -> &Nick {
        self.identity.nick()
    }

    pub fn phase(&self) -> TakerPhase {
        self.phase
    }

    /// Execute one CoinJoin run.
    pub async fn run(&mut self, request: CoinjoinRequest) -> Result<RunOutcome> {
        if self.config.coinjoin.counterparty_count < 2 {
            return Err(CoinjoinError::CounterpartyCountInvalid(self.config.coinjoin.counterparty_count));
        }
        // engines are reusable across runs (schedule mode); each run
        // starts from a clean cursor
        self.phase = TakerPhase::Idle;
        let outcome = self.run_inner(&request).await;
        match &outcome {
            Ok(done) => {
                log::info!("coinjoin complete: txid {} with {} makers", done.txid, done.makers.len());
                self.record_history(Some(done.txid), request.amount, done.makers.len(), "DONE", true);
            }
            Err(err) => {
                let phase = self.phase.label();
                log::error!("coinjoin aborted in phase {phase}: {err} (code {:?})", err.code());
                self.transition_lossy(TakerPhase::Aborted);
                self.record_history(None, request.amount, 0, phase, false);
            }
        }
        outcome
    }

    async fn run_inner(&mut self, request: &CoinjoinRequest) -> Result<RunOutcome> {
        self.transition(TakerPhase::Discover)?;
        self.discover().await?;

        let attempts = 1 + u32::from(self.config.coinjoin.max_maker_replacement_attempts);
        let mut last_err = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                log::info!("replacement attempt {attempt}: retrying with fresh sessions");
            }
            match self.attempt_coinjoin(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(err @ (CoinjoinError::InsufficientMakers { .. } | CoinjoinError::CounterpartyCountInvalid(_))) => {
                    return Err(err)
                }
                Err(err) => {
                    log::warn!("attempt {attempt} failed: {err}");
                    // Aborted attempts may leave the cursor mid-protocol;
                    // rewind to the re-entry point for the next attempt.
                    self.phase = TakerPhase::Discover;
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CoinjoinError::InsufficientMakers { needed: self.config.coinjoin.counterparty_count, available: 0 }
        }))
    }

    /// One full fill -> auth -> build -> sign -> broadcast attempt.
    async fn attempt_coinjoin(&mut self, request: &CoinjoinRequest) -> Result<RunOutcome> {
        let n = self.config.coinjoin.counterparty_count;
        let podle = self.next_podle(request)?;
        // fresh responses only: an earlier attempt's fingerprints must
        // not swallow this attempt's replies
        self.response_dedup = dedup::response_window();
        self.broadcast_dedup.purge(u64::MAX);

        self.transition(TakerPhase::Fill)?;
        let mut sessions = self.fill_phase(request, &podle, n).await?;

        self.transition(TakerPhase::Auth)?;
        self.auth_phase(request, &podle, &mut sessions).await?;
        if sessions.len() < n {
            return Err(CoinjoinError::Message(format!("only {} of {n} makers passed auth", sessions.len())));
        }

        self.transition(TakerPhase::TxBuild)?;
        let built = self.build_phase(request, &sessions).await?;

        self.transition(TakerPhase::Sign)?;
        let signed = self.sign_phase(request, &built, &mut sessions).await?;

        self.transition(TakerPhase::Broadcast)?;
        let makers: Vec<Nick> = sessions.keys().cloned().collect();
        let txid = self.broadcast_phase(&signed, &sessions).await?;

        self.transition(TakerPhase::Done)?;
        Ok(RunOutcome { txid, tx: signed, makers })
    }

    // ---- DISCOVER ----

    async fn discover(&mut self) -> Result<()> {
        let msg = command::AppMessage::new(
            self.identity.nick().clone(),
            Nick::new(PUBLIC_NICK),
            commands::ORDERBOOK,
            "",
        );
        for channel in self.channels.values() {
            channel.send(Envelope::new(EnvelopeType::Pubmsg, msg.format())).await?;
        }
        // collect offers for the configured window
        let deadline = Instant::now() + Duration::from_secs(self.config.coinjoin.order_wait_time_secs);
        while let Some(_private) = self.next_private(deadline).await? {
            // offer/tbond traffic is absorbed by ingest; private phase
            // traffic before FILL is meaningless and dropped here
        }
        log::info!("orderbook collected: {} offers", self.orderbook.len());
        Ok(())
    }

    async fn select_counterparties(
        &mut self,
        request: &CoinjoinRequest,
        n: usize,
        exclude: &HashSet<Nick>,
    ) -> Result<Vec<Offer>> {
        let mut query = OfferQuery {
            amount: request.amount,
            max_fee: None,
            kind: request.offer_kind,
            ignored: self.ignored.union(exclude).cloned().collect(),
        };
        query.ignored.insert(self.identity.nick().clone());
        // never pick the operator's own maker process; re-read per
        // selection so a maker started mid-run is still caught
        if let Some(dir) = &self.state_dir {
            if let Some(own_maker) = NickStateFile::read(dir, "maker")? {
                query.ignored.insert(own_maker);
            }
        }

        let snapshot = self.orderbook.snapshot(now_secs(), &self.registry);
        let filtered = filter_offers(snapshot, &query);
        let pool = dedupe_cheapest(filtered, request.amount);
        let height = self.oracle.tip_height().await?;
        select_makers(pool, request.amount, n, self.policy, self.scorer.as_ref(), height, &mut self.rng)
    }

    // ---- FILL ----

    fn next_podle(&mut self, request: &CoinjoinRequest) -> Result<Podle> {
        let retries = self.config.maker.taker_utxo_retries;
        let index = self
            .commitments
            .used()
            .next_index(&request.podle_utxo, retries)
            .ok_or_else(|| CoinjoinError::CommitmentReused(format!(
                "all {} retry indices consumed for {}",
                retries + 1,
                request.podle_utxo
            )))?;
        podle::generate(&request.podle_key, request.podle_utxo, index)
    }

    async fn fill_phase(
        &mut self,
        request: &CoinjoinRequest,
        podle: &Podle,
        n: usize,
    ) -> Result<HashMap<Nick, TakerSession>> {
        let mut sessions: HashMap<Nick, TakerSession> = HashMap::new();
        let mut responded: HashSet<Nick> = HashSet::new();
        let mut replacement_draws = 0u8;

        loop {
            let exclude: HashSet<Nick> = sessions.keys().cloned().collect();
            let wanted = n - responded.len();
            let offers = self.select_counterparties(request, wanted, &exclude).await?;

            for offer in offers {
                let maker = offer.maker.clone();
                let (box_secret, box_public) = boxer::generate_keypair();
                let core = SessionCore::new(maker.clone(), box_secret, box_public, now_secs());
                let hostid = self.hostid_for(&maker);
                let fill = FillMsg {
                    order_id: offer.order_id,
                    amount: request.amount,
                    taker_box_pub: box_public,
                    commitment: podle.commitment,
                };
                self.send_private(&maker, commands::FILL, &fill.to_args(), &hostid).await?;
                sessions.insert(
                    maker,
                    TakerSession { core, offer, hostid, maker_utxos: Vec::new(), ioauth: None, sigs: HashMap::new() },
                );
            }

            // wait for !pubkey from everyone we just filled
            let deadline = Instant::now() + self.phase_timeout();
            while responded.len() < sessions.len() {
                let Some((msg, hostid)) = self.next_private(deadline).await? else { break };
                if msg.command != commands::PUBKEY {
                    continue;
                }
                let Some(session) = sessions.get_mut(&msg.from) else { continue };
                if responded.contains(&msg.from) {
                    continue;
                }
                match parse_pubkey_args(&msg.args) {
                    Ok(maker_pub) => {
                        session.core.their_box_public = Some(maker_pub);
                        session.hostid = hostid;
                        responded.insert(msg.from.clone());
                    }
                    Err(err) => log::warn!("bad pubkey from {}: {err}", msg.from),
                }
            }

            // non-responders join the ignore set
            let silent: Vec<Nick> = sessions.keys().filter(|m| !responded.contains(*m)).cloned().collect();
            for maker in silent {
                log::info!("maker {maker} did not answer !fill; ignoring for this run");
                sessions.remove(&maker);
                self.ignored.insert(maker);
            }

            if responded.len() >= n {
                return Ok(sessions);
            }
            if replacement_draws >= self.config.coinjoin.max_maker_replacement_attempts {
                return Err(CoinjoinError::InsufficientMakers { needed: n, available: responded.len() });
            }
            replacement_draws += 1;
            log::info!(
                "{} of {n} makers responded; drawing replacements (attempt {replacement_draws})",
                responded.len()
            );
        }
    }

    // ---- AUTH ----

    async fn auth_phase(
        &mut self,
        request: &CoinjoinRequest,
        podle: &Podle,
        sessions: &mut HashMap<Nick, TakerSession>,
    ) -> Result<()> {
        let taker_refs: Vec<UtxoRef> = request.taker_utxos.iter().map(|op| UtxoRef::legacy(*op)).collect();
        let payload = AuthPayload {
            reveal: PodleReveal { p: podle.p, p2: podle.p2, s: podle.s, e: podle.e, utxo: podle.utxo },
            utxos: taker_refs,
            cj_destination: request.cj_destination.clone(),
        };
        let plaintext = payload.to_plaintext(&podle.serialize_revelation(), false);

        for (maker, session) in sessions.iter_mut() {
            let their_pub = session.core.their_box_public()?;
            let sealed = boxer::seal(plaintext.as_bytes(), &session.core.box_secret, &their_pub)?;
            session.core.pin_channel(&session.hostid.clone())?;
            let hostid = session.hostid.clone();
            let maker = maker.clone();
            // sends are sequential; a send failure fails only this session
            if let Err(err) = self.send_private(&maker, commands::AUTH, &sealed, &hostid).await {
                log::warn!("auth send to {maker} failed: {err}");
            }
        }

        // the commitment is now revealed to counterparties: burn it
        self.commitments.record(CommitmentRecord {
            commitment: podle.commitment,
            nums_index: podle.index,
            utxo: podle.utxo,
            first_used_at: now_secs(),
        })?;

        let deadline = Instant::now() + self.phase_timeout();
        let mut failed: Vec<Nick> = Vec::new();
        while sessions.values().any(|s| s.ioauth.is_none()) {
            let Some((msg, hostid)) = self.next_private(deadline).await? else { break };
            match msg.command.as_str() {
                commands::IOAUTH => {
                    let maker = msg.from.clone();
                    let Some(session) = sessions.get_mut(&maker) else { continue };
                    if session.ioauth.is_some() {
                        continue;
                    }
                    match Self::accept_ioauth(
                        session,
                        &msg.args,
                        &hostid,
                        self.identity.nick(),
                        request,
                        self.oracle.as_ref(),
                    )
                    .await
                    {
                        Ok(()) => log::info!("ioauth accepted from {maker}"),
                        Err(err) => {
                            log::warn!("ioauth from {maker} rejected: {err} (code {:?})", err.code());
                            failed.push(maker);
                        }
                    }
                }
                commands::ERROR => {
                    log::warn!("maker {} errored during auth: {}", msg.from, msg.args);
                    failed.push(msg.from.clone());
                }
                _ => {}
            }
            for maker in failed.drain(..) {
                sessions.remove(&maker);
                self.ignored.insert(maker);
            }
        }

        // anyone still silent is dropped and ignored
        let silent: Vec<Nick> = sessions
            .iter()
            .filter(|(_, s)| s.ioauth.is_none())
            .map(|(maker, _)| maker.clone())
            .collect();
        for maker in silent {
            log::info!("maker {maker} did not answer !auth; ignoring for this run");
            sessions.remove(&maker);
            self.ignored.insert(maker);
        }
        Ok(())
    }

    async fn accept_ioauth(
        session: &mut TakerSession,
        args: &str,
        hostid: &str,
        my_nick: &Nick,
        request: &CoinjoinRequest,
        oracle: &dyn UtxoOracle,
    ) -> Result<()> {
        session.core.pin_channel(hostid)?;
        let their_pub = session.core.their_box_public()?;
        let plaintext = boxer::open(args.trim(), &session.core.box_secret, &their_pub)?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| CoinjoinError::DecryptFailed)?;
        let ioauth = IoauthPayload::parse(&plaintext)?;

        let tip = oracle.tip_height().await?;
        if let Some(bond) = &ioauth.bond {
            Self::validate_bond(bond, &session.core.counterparty, my_nick, tip, oracle).await?;
        }

        // every declared input must really exist; values feed the builder
        let mut maker_utxos = Vec::with_capacity(ioauth.utxos.len());
        for utxo in &ioauth.utxos {
            let entry = oracle
                .get_utxo(&utxo.outpoint)
                .await?
                .ok_or(CoinjoinError::UtxoMissing { outpoint: utxo.outpoint.to_string() })?;
            maker_utxos.push((utxo.outpoint, entry.value));
        }
        if maker_utxos.is_empty() {
            return Err(CoinjoinError::ProtocolViolation("ioauth with no inputs".into()));
        }
        let total: u64 = maker_utxos.iter().map(|(_, v)| v).sum();
        if total < request.amount {
            return Err(CoinjoinError::UtxoValueLow { value: total, required: request.amount });
        }

        session.maker_utxos = maker_utxos;
        session.ioauth = Some(ioauth);
        Ok(())
    }

    async fn validate_bond(
        bond: &BondProof,
        maker: &Nick,
        taker: &Nick,
        tip: u32,
        oracle: &dyn UtxoOracle,
    ) -> Result<()> {
        bond.verify(maker, taker, tip)?;
        let entry = oracle
            .get_utxo(&bond.outpoint())
            .await?
            .ok_or_else(|| CoinjoinError::BondInvalid(format!("bond utxo {} not found", bond.outpoint())))?;
        if entry.value == 0 {
            return Err(CoinjoinError::BondInvalid("bond utxo has no value".into()));
        }
        Ok(())
    }

    // ---- TX_BUILD ----

    async fn build_phase(
        &mut self,
        request: &CoinjoinRequest,
        sessions: &HashMap<Nick, TakerSession>,
    ) -> Result<crate::application::builder::BuiltTx> {
        let mut taker_utxos = Vec::with_capacity(request.taker_utxos.len());
        for outpoint in &request.taker_utxos {
            let entry = self
                .oracle
                .get_utxo(outpoint)
                .await?
                .ok_or(CoinjoinError::UtxoMissing { outpoint: outpoint.to_string() })?;
            taker_utxos.push((*outpoint, entry.value));
        }

        let mut makers = HashMap::new();
        let mut num_inputs = taker_utxos.len();
        for (nick, session) in sessions {
            let ioauth = session
                .ioauth
                .as_ref()
                .ok_or_else(|| CoinjoinError::ProtocolViolation("build before ioauth".into()))?;
            num_inputs += session.maker_utxos.len();
            makers.insert(
                nick.clone(),
                MakerLeg {
                    utxos: session.maker_utxos.clone(),
                    cj_spk: ioauth.cj_spk.clone(),
                    change_spk: ioauth.change_spk.clone(),
                    real_cjfee: session.offer.real_cjfee(request.amount),
                    txfee_contribution: session.offer.txfee_contribution,
                },
            );
        }

        let sat_per_vb = match self.config.coinjoin.fee_rate_sat_vb {
            Some(rate) => rate,
            None => self.oracle.estimate_fee(self.config.coinjoin.fee_target_blocks).await?,
        };
        // assume every party takes change for the estimate; overpaying a
        // few vbytes beats underpaying the relay floor
        let num_outputs = 2 * (sessions.len() + 1);
        let tx_fee = estimate_tx_fee(num_inputs, num_outputs, sat_per_vb);

        let build = BuildRequest {
            cj_amount: request.amount,
            taker_utxos,
            taker_cj_spk: request.cj_destination.clone(),
            taker_change_spk: request.change_destination.clone(),
            makers,
            tx_fee,
            dust_threshold: self.config.coinjoin.dust_threshold,
        };
        build_unsigned(&build, self.identity.nick(), &mut self.rng)
    }

    // ---- SIGN ----

    async fn sign_phase(
        &mut self,
        request: &CoinjoinRequest,
        built: &crate::application::builder::BuiltTx,
        sessions: &mut HashMap<Nick, TakerSession>,
    ) -> Result<Transaction> {
        let payload = tx_payload(&built.tx.serialize());
        for (maker, session) in sessions.iter_mut() {
            let their_pub = session.core.their_box_public()?;
            let sealed = boxer::seal(payload.as_bytes(), &session.core.box_secret, &their_pub)?;
            let hostid = session.hostid.clone();
            let maker = maker.clone();
            if let Err(err) = self.send_private(&maker, commands::TX, &sealed, &hostid).await {
                log::warn!("tx send to {maker} failed: {err}");
            }
        }

        let deadline = Instant::now() + self.phase_timeout();
        let mut failed: Vec<Nick> = Vec::new();
        while !Self::all_signed(sessions) {
            let Some((msg, hostid)) = self.next_private(deadline).await? else { break };
            match msg.command.as_str() {
                commands::SIG => {
                    let Some(session) = sessions.get_mut(&msg.from) else { continue };
                    if let Err(err) = Self::accept_sig(session, &msg.args, &hostid) {
                        log::warn!("bad sig from {}: {err}", msg.from);
                        failed.push(msg.from.clone());
                    }
                }
                commands::ERROR => {
                    log::warn!("maker {} refused to sign: {}", msg.from, msg.args);
                    failed.push(msg.from.clone());
                }
                _ => {}
            }
            if !failed.is_empty() {
                for maker in failed.drain(..) {
                    sessions.remove(&maker);
                    self.ignored.insert(maker);
                }
                // a lost maker invalidates the transaction as built
                return Err(CoinjoinError::Message("maker failed during signing; rebuilding".into()));
            }
        }

        let missing: Vec<Nick> = sessions
            .iter()
            .filter(|(_, s)| !s.maker_utxos.iter().all(|(op, _)| s.sigs.contains_key(op)))
            .map(|(maker, _)| maker.clone())
            .collect();
        if !missing.is_empty() {
            for maker in missing {
                log::warn!("maker {maker} did not deliver all signatures");
                sessions.remove(&maker);
                self.ignored.insert(maker);
            }
            return Err(CoinjoinError::Message("signature collection timed out; rebuilding".into()));
        }

        // our own inputs
        let mut witnesses: HashMap<Outpoint, Vec<Vec<u8>>> = HashMap::new();
        for session in sessions.values() {
            for (outpoint, stack) in &session.sigs {
                witnesses.insert(*outpoint, stack.clone());
            }
        }
        for outpoint in &request.taker_utxos {
            let entry = self
                .oracle
                .get_utxo(outpoint)
                .await?
                .ok_or(CoinjoinError::UtxoMissing { outpoint: outpoint.to_string() })?;
            let index = built
                .tx
                .inputs
                .iter()
                .position(|input| input.outpoint == *outpoint)
                .ok_or_else(|| CoinjoinError::Message(format!("own input {outpoint} missing from built tx")))?;
            let stack = self.wallet.sign_input(&built.tx, index, &entry).await?;
            witnesses.insert(*outpoint, stack);
        }

        attach_witnesses(&built.tx, &witnesses)
    }

    fn all_signed(sessions: &HashMap<Nick, TakerSession>) -> bool {
        sessions.values().all(|s| s.maker_utxos.iter().all(|(op, _)| s.sigs.contains_key(op)))
    }

    fn accept_sig(session: &mut TakerSession, args: &str, hostid: &str) -> Result<()> {
        session.core.pin_channel(hostid)?;
        let their_pub = session.core.their_box_public()?;
        let plaintext = boxer::open(args.trim(), &session.core.box_secret, &their_pub)?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| CoinjoinError::DecryptFailed)?;
        let sig = SigPayload::parse(&plaintext)?;
        if !session.maker_utxos.iter().any(|(op, _)| *op == sig.outpoint) {
            return Err(CoinjoinError::ProtocolViolation(format!("signature for foreign input {}", sig.outpoint)));
        }
        session.sigs.insert(sig.outpoint, sig.witness);
        Ok(())
    }

    // ---- BROADCAST ----

    async fn broadcast_phase(&mut self, signed: &Transaction, sessions: &HashMap<Nick, TakerSession>) -> Result<Txid> {
        let peers: Vec<(Nick, String)> =
            sessions.values().map(|s| (s.core.counterparty.clone(), s.hostid.clone())).collect();
        broadcast_transaction(
            signed,
            self.config.coinjoin.broadcast_policy,
            &peers,
            self.oracle.as_ref(),
            &self.identity,
            &self.channels,
            &mut self.rng,
        )
        .await
    }

    // ---- plumbing ----

    fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.session_timeout_sec)
    }

    fn transition(&mut self, target: TakerPhase) -> Result<()> {
        if !self.phase.can_transition_to(target) {
            return Err(CoinjoinError::PhaseViolation {
                from: self.phase.label().to_string(),
                to: target.label().to_string(),
            });
        }
        self.phase = target;
        Ok(())
    }

    fn transition_lossy(&mut self, target: TakerPhase) {
        if self.phase.can_transition_to(target) {
            self.phase = target;
        }
    }

    fn hostid_for(&self, maker: &Nick) -> String {
        self.maker_hostids
            .get(maker)
            .cloned()
            .or_else(|| self.channels.keys().next().cloned())
            .unwrap_or_default()
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

    /// Pump the inbox until a private message for us arrives or the
    /// deadline passes. Broadcast traffic (offers, bonds, hp2) is folded
    /// into local state on the way through.
    async fn next_private(&mut self, deadline: Instant) -> Result<Option<(command::AppMessage, String)>> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            match tokio::time::timeout(deadline - now, self.inbox.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Err(CoinjoinError::transport("inbox", "all channels closed")),
                Ok(Some(incoming)) => {
                    if let Some(private) = self.ingest(incoming).await? {
                        return Ok(Some(private));
                    }
                }
            }
        }
    }

    async fn ingest(&mut self, incoming: Incoming) -> Result<Option<(command::AppMessage, String)>> {
        match incoming.envelope.kind {
            EnvelopeType::Pubmsg => {
                let Ok(msg) = command::AppMessage::parse(&incoming.envelope.line) else { return Ok(None) };
                if msg.from == *self.identity.nick() {
                    return Ok(None);
                }
                let fingerprint = dedup::broadcast_fingerprint(&msg.from, &msg.command, &msg.args);
                if !self.broadcast_dedup.observe(fingerprint, now_secs()) {
                    return Ok(None);
                }
                self.absorb_broadcast(&msg, &incoming.hostid).await;
                Ok(None)
            }
            EnvelopeType::Privmsg => {
                let msg = match command::parse_signed(&incoming.envelope.line, &incoming.hostid) {
                    Ok(msg) => msg,
                    Err(err) => {
                        log::debug!("dropping unverifiable privmsg: {err}");
                        return Ok(None);
                    }
                };
                if msg.to != *self.identity.nick() {
                    return Ok(None);
                }
                self.maker_hostids.insert(msg.from.clone(), incoming.hostid.clone());
                match msg.command.as_str() {
                    commands::RELOFFER | commands::ABSOFFER | commands::TBOND => {
                        self.absorb_broadcast(&msg, &incoming.hostid).await;
                        Ok(None)
                    }
                    commands::PUBKEY | commands::IOAUTH => {
                        let key = (msg.from.clone(), msg.command.clone());
                        if !self.response_dedup.observe(key, now_secs()) {
                            return Ok(None);
                        }
                        Ok(Some((msg, incoming.hostid)))
                    }
                    commands::SIG => {
                        // one !sig per input: dedup on the payload, not
                        // the command
                        let fingerprint = dedup::broadcast_fingerprint(&msg.from, &msg.command, &msg.args);
                        if !self.broadcast_dedup.observe(fingerprint, now_secs()) {
                            return Ok(None);
                        }
                        Ok(Some((msg, incoming.hostid)))
                    }
                    _ => Ok(Some((msg, incoming.hostid))),
                }
            }
            EnvelopeType::Peerlist => {
                self.absorb_peerlist(&incoming.envelope.line, &incoming.hostid);
                Ok(None)
            }
            EnvelopeType::Ping => {
                if let Some(channel) = self.channels.get(&incoming.hostid) {
                    channel.send(Envelope::new(EnvelopeType::Pong, "")).await?;
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Comma-separated peerlist entries from one directory. A maker is
    /// only treated as gone once every attached directory agrees.
    fn absorb_peerlist(&mut self, line: &str, hostid: &str) {
        let now = now_secs();
        let mut listed = BTreeSet::new();
        for entry in line.split(',').filter(|e| !e.is_empty()) {
            match peer::parse_peerlist_entry(entry) {
                Ok((nick, location, disconnected, features)) => {
                    if disconnected {
                        self.presence.update(&nick, hostid, false);
                    } else {
                        self.registry.upsert(nick.clone(), location, features, now);
                        self.registry.mark_handshaked(&nick, now);
                        listed.insert(nick);
                    }
                }
                Err(err) => log::debug!("bad peerlist entry on {hostid}: {err}"),
            }
        }
        for gone in self.presence.sync_with_peerlist(hostid, &listed) {
            log::info!("maker {gone} left all directories; marking disconnected");
            self.registry.mark_disconnected(&gone);
        }
    }

    async fn absorb_broadcast(&mut self, msg: &command::AppMessage, hostid: &str) {
        let now = now_secs();
        match msg.command.as_str() {
            commands::RELOFFER | commands::ABSOFFER => {
                let kind =
                    if msg.command == commands::RELOFFER { OfferKind::Relative } else { OfferKind::Absolute };
                match Offer::parse_wire_args(msg.from.clone(), kind, &msg.args, now) {
                    Ok(offer) => {
                        self.registry.upsert(msg.from.clone(), PeerLocation::NotServing, BTreeSet::new(), now);
                        self.registry.mark_handshaked(&msg.from, now);
                        self.maker_hostids.insert(msg.from.clone(), hostid.to_string());
                        self.orderbook.insert(offer);
                    }
                    Err(err) => log::debug!("malformed offer from {}: {err}", msg.from),
                }
            }
            commands::TBOND => match self.accept_tbond(&msg.from, &msg.args).await {
                Ok(()) => log::debug!("bond accepted from {}", msg.from),
                Err(err) => log::debug!("bond from {} rejected: {err}", msg.from),
            },
            commands::HP2 => {
                // makers police commitment reuse; takers have their own
                // used-commitment ledger
            }
            commands::ORDERBOOK => {}
            other => log::trace!("ignoring broadcast !{other} from {}", msg.from),
        }
    }

    async fn accept_tbond(&mut self, maker: &Nick, args: &str) -> Result<()> {
        let proof = BondProof::from_base64(args.trim())?;
        let tip = self.oracle.tip_height().await?;
        proof.verify(maker, self.identity.nick(), tip)?;
        let entry = self
            .oracle
            .get_utxo(&proof.outpoint())
            .await?
            .ok_or_else(|| CoinjoinError::BondInvalid(format!("bond utxo {} not found", proof.outpoint())))?;
        if entry.value == 0 {
            return Err(CoinjoinError::BondInvalid("bond utxo has no value".into()));
        }
        self.orderbook.insert_bond(maker.clone(), proof);
        Ok(())
    }

    fn record_history(&self, txid: Option<Txid>, amount: u64, counterparties: usize, phase: &str, success: bool) {
        if let Some(history) = &self.history {
            let row = HistoryRow {
                timestamp: now_secs(),
                txid: txid.unwrap_or_default(),
                cj_amount: amount,
                counterparties,
                phase: phase.to_string(),
                success,
            };
            if let Err(err) = history.append(&row) {
                log::warn!("could not append history row: {err}");
            }
        }
    }
}

//! The consensus component.
//!
//! [`Consensus`] owns the round state and wires the collaborators together.
//! Message handlers live in `validator.rs`, outbound construction in
//! `construct.rs`.

use crate::committee::Committee;
use crate::config::ConsensusConfig;
use crate::crypto::{BlsPublicKey, BlsScheme, PrivateKeyWrapper};
use crate::error::{ConsensusError, ErrorKind, Result};
use crate::fbft_log::FbftLog;
use crate::message::{FbftMessage, MessageType, SignedMessage};
use crate::state::{ConsensusState, Mode, Phase, StateSnapshot};
use crate::timeout::{TimeoutType, Timers};
use crate::traits::{BlockVerifier, Blockchain, MessageSender};
use crate::types::BlockHash;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;

/// Events emitted by the consensus component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusEvent {
    /// The round moved to another phase.
    PhaseChanged {
        block_num: u64,
        old: Phase,
        new: Phase,
    },
    /// The node changed mode.
    ModeChanged { old: Mode, new: Mode },
    /// Prepare votes were broadcast.
    PrepareSent {
        block_num: u64,
        block_hash: BlockHash,
        messages: usize,
    },
    /// Commit votes were broadcast.
    CommitSent {
        block_num: u64,
        block_hash: BlockHash,
        messages: usize,
    },
    /// A block was committed to the chain.
    BlockCommitted {
        block_num: u64,
        block_hash: BlockHash,
        view_id: u64,
        finality: Option<Duration>,
    },
    /// The node fell behind and asked the syncer to catch up.
    SyncRequested { block_num: u64 },
    /// A view change started.
    ViewChangeStarted { view_id: u64 },
}

/// Validator-side FBFT consensus for one shard.
pub struct Consensus {
    /// Configuration.
    pub(crate) config: ConsensusConfig,

    /// Keys this node may sign with.
    pub(crate) keys: Vec<PrivateKeyWrapper>,

    /// Signature scheme.
    pub(crate) scheme: Arc<dyn BlsScheme>,

    /// Committee of the current epoch.
    committee: RwLock<Arc<Committee>>,

    /// Chain store.
    pub(crate) chain: Arc<dyn Blockchain>,

    /// Transport.
    pub(crate) sender: Arc<dyn MessageSender>,

    /// External block verifier, unset until the node finishes startup.
    block_verifier: RwLock<Option<Arc<dyn BlockVerifier>>>,

    /// Blocks and messages of recent rounds.
    pub(crate) fbft_log: Arc<FbftLog>,

    /// Round state.
    pub(crate) state: Mutex<ConsensusState>,

    /// Copy of `state.block_num` readable without the lock.
    block_num: AtomicU64,

    /// Single-slot signal to the syncer.
    block_num_low: mpsc::Sender<()>,

    /// Event broadcaster.
    events: broadcast::Sender<ConsensusEvent>,
}

impl Consensus {
    /// Creates the consensus component.
    ///
    /// Returns the receiving end of the resync signal; the syncer listens on
    /// it and calls [`Consensus::sync_completed`] when done.
    pub fn new(
        config: ConsensusConfig,
        keys: Vec<PrivateKeyWrapper>,
        scheme: Arc<dyn BlsScheme>,
        committee: Committee,
        chain: Arc<dyn Blockchain>,
        sender: Arc<dyn MessageSender>,
    ) -> Result<(Self, mpsc::Receiver<()>)> {
        config.validate()?;
        if committee.shard_id() != config.shard_id {
            return Err(ConsensusError::InvalidConfig(format!(
                "committee is for shard {}, node is on shard {}",
                committee.shard_id(),
                config.shard_id
            )));
        }

        let mut timers = Timers::new(
            config.bootstrap_timeout(),
            config.consensus_timeout(),
            config.view_change_timeout(),
        );
        timers.start(TimeoutType::Bootstrap);

        let block_num = chain.current_block_number() + 1;
        // No leader yet: the first leader message sets view and leader.
        let mut state = ConsensusState::new(block_num, timers);
        state.ignore_view_id_check = true;

        let (block_num_low, sync_rx) = mpsc::channel(1);
        let (events, _) = broadcast::channel(config.mailbox_size);

        tracing::info!(
            shard_id = config.shard_id,
            block_num,
            keys = keys.len(),
            committee = committee.len(),
            "consensus created"
        );

        let consensus = Self {
            config,
            keys,
            scheme,
            committee: RwLock::new(Arc::new(committee)),
            chain,
            sender,
            block_verifier: RwLock::new(None),
            fbft_log: Arc::new(FbftLog::new()),
            state: Mutex::new(state),
            block_num: AtomicU64::new(block_num),
            block_num_low,
            events,
        };

        Ok((consensus, sync_rx))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Returns the committee of the current epoch.
    pub fn committee(&self) -> Arc<Committee> {
        self.committee.read().clone()
    }

    /// Replaces the committee, e.g. on an epoch change.
    pub fn update_committee(&self, committee: Committee) {
        tracing::info!(
            epoch = committee.epoch(),
            members = committee.len(),
            "committee updated"
        );
        *self.committee.write() = Arc::new(committee);
    }

    /// Installs the block verifier.
    pub fn set_block_verifier(&self, verifier: Arc<dyn BlockVerifier>) {
        *self.block_verifier.write() = Some(verifier);
    }

    pub(crate) fn block_verifier(&self) -> Result<Arc<dyn BlockVerifier>> {
        self.block_verifier
            .read()
            .clone()
            .ok_or(ConsensusError::VerifierUnset)
    }

    /// Returns the FBFT log.
    pub fn fbft_log(&self) -> &Arc<FbftLog> {
        &self.fbft_log
    }

    /// Block number being agreed on. Advisory: may change right after the
    /// call returns.
    pub fn block_num(&self) -> u64 {
        self.block_num.load(Ordering::Acquire)
    }

    pub(crate) fn set_block_num(&self, state: &mut ConsensusState, block_num: u64) {
        state.block_num = block_num;
        self.block_num.store(block_num, Ordering::Release);
    }

    /// Subscribes to consensus events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ConsensusEvent) {
        let _ = self.events.send(event);
    }

    /// Returns a copy of the round state.
    pub async fn snapshot(&self) -> StateSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Sets the current view.
    pub async fn set_view_ids(&self, view_id: u64) {
        let mut state = self.state.lock().await;
        state.view_id = view_id;
        state.view_changing_id = view_id;
    }

    /// Sets the current leader. Leader messages are checked against it
    /// from now on instead of being adopted.
    pub async fn set_leader(&self, leader: BlsPublicKey) {
        let mut state = self.state.lock().await;
        state.leader = Some(leader);
        state.ignore_view_id_check = false;
    }

    /// Sets the mode.
    pub async fn set_mode(&self, mode: Mode) {
        let mut state = self.state.lock().await;
        self.set_mode_locked(&mut state, mode);
    }

    pub(crate) fn set_mode_locked(&self, state: &mut ConsensusState, mode: Mode) {
        if let Some(old) = state.set_mode(mode) {
            tracing::info!(old = %old, new = %mode, "mode changed");
            self.emit(ConsensusEvent::ModeChanged { old, new: mode });
        }
    }

    pub(crate) fn switch_phase(&self, state: &mut ConsensusState, context: &str, phase: Phase) {
        if let Some(old) = state.switch_phase(phase) {
            tracing::debug!(
                context,
                block_num = state.block_num,
                old = %old,
                new = %phase,
                "switched phase"
            );
            self.emit(ConsensusEvent::PhaseChanged {
                block_num: state.block_num,
                old,
                new: phase,
            });
        }
    }

    /// Decodes a raw message and checks it comes from committee members of
    /// this shard.
    pub fn parse_fbft_message(&self, raw: &[u8]) -> Result<FbftMessage> {
        let signed = SignedMessage::decode(raw)?;
        let msg = &signed.message;

        if msg.shard_id != self.config.shard_id {
            return Err(ConsensusError::WrongShard {
                expected: self.config.shard_id,
                got: msg.shard_id,
            });
        }

        let committee = self.committee();
        if let Some(key) = msg
            .sender_pubkeys
            .iter()
            .find(|k| !committee.is_validator_in_committee(k))
        {
            return Err(ConsensusError::SenderNotInCommittee(key.to_hex()));
        }

        let msg_type = msg.msg_type;
        let signed_bytes: &[u8] = match msg_type {
            MessageType::Prepare => msg.block_hash.as_bytes(),
            // Commit votes are checked against the commit payload by the
            // leader, which has the block.
            MessageType::Commit => return Ok(signed.message),
            _ => signed.body_digest().as_bytes(),
        };
        if !self
            .scheme
            .verify_aggregate(&msg.sender_pubkeys, signed_bytes, &signed.signature)
        {
            return Err(ConsensusError::InvalidMessageSignature);
        }

        Ok(signed.message)
    }

    /// Parses and handles one raw message. Rejections are logged, never
    /// returned.
    pub async fn handle_message(&self, raw: &[u8]) {
        if let Err(err) = self.process_message(raw).await {
            log_rejection(&err);
        }
    }

    async fn process_message(&self, raw: &[u8]) -> Result<()> {
        let msg = self.parse_fbft_message(raw)?;

        if msg.msg_type.is_leader_message() {
            self.check_leader(&msg).await?;
        }

        match msg.msg_type {
            MessageType::Announce => self.on_announce(msg).await,
            MessageType::Prepared => self.on_prepared(msg).await,
            MessageType::Committed => self.on_committed(msg).await,
            other => {
                tracing::debug!(
                    msg_type = %other,
                    msg_block_num = msg.block_num,
                    "ignoring message not handled by validators"
                );
                Ok(())
            }
        }
    }

    async fn check_leader(&self, msg: &FbftMessage) -> Result<()> {
        if !msg.has_single_sender() {
            return Err(ConsensusError::MultipleSenders(msg.sender_pubkeys.len()));
        }
        let (leader, ignore) = {
            let state = self.state.lock().await;
            (state.leader, state.ignore_view_id_check)
        };
        if ignore {
            return Ok(());
        }
        let sender = msg.sender_pubkeys[0];
        if leader != Some(sender) {
            return Err(ConsensusError::NotFromLeader(sender.to_hex()));
        }
        Ok(())
    }

    /// Runs the message and timer loop until `inbound` closes.
    ///
    /// Each message is handled on its own task.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<Bytes>) -> Result<()> {
        let mut tick = tokio::time::interval(self.config.timer_tick());

        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    match msg {
                        Some(raw) => {
                            let this = self.clone();
                            tokio::spawn(async move {
                                this.handle_message(&raw).await;
                            });
                        }
                        None => {
                            tracing::info!("inbound channel closed, consensus loop exiting");
                            return Ok(());
                        }
                    }
                }

                _ = tick.tick() => {
                    self.check_timeouts().await;
                }
            }
        }
    }

    /// Checks round timers. Any expiry starts a view change.
    pub async fn check_timeouts(&self) {
        let mut state = self.state.lock().await;

        if matches!(state.mode, Mode::Syncing | Mode::Listening) {
            state.timers.stop_all();
            return;
        }

        let expired = state.timers.expired(Instant::now());
        if expired.is_empty() {
            return;
        }
        for kind in &expired {
            tracing::warn!(
                timeout = %kind,
                block_num = state.block_num,
                view_id = state.view_id,
                "consensus timeout"
            );
        }
        self.start_view_change_locked(&mut state);
    }

    /// Starts a view change to the next view.
    pub async fn start_view_change(&self) {
        let mut state = self.state.lock().await;
        self.start_view_change_locked(&mut state);
    }

    pub(crate) fn start_view_change_locked(&self, state: &mut ConsensusState) {
        let next = state.view_id.max(state.view_changing_id) + 1;
        let steps = u32::try_from(next - state.view_id).unwrap_or(u32::MAX);

        state.view_changing_id = next;
        self.set_mode_locked(state, Mode::ViewChanging);
        state.timers.stop(TimeoutType::Consensus);
        state.timers.stop(TimeoutType::Bootstrap);

        let duration = self.config.view_change_timeout().saturating_mul(steps);
        let timer = state.timers.get_mut(TimeoutType::ViewChange);
        timer.set_duration(duration);
        timer.start();

        tracing::warn!(
            view_id = state.view_id,
            next_view_id = next,
            timeout_ms = duration.as_millis() as u64,
            "starting view change"
        );
        self.emit(ConsensusEvent::ViewChangeStarted { view_id: next });
    }

    /// Leaves view change mode with `leader` leading `view_id`.
    pub async fn complete_view_change(&self, view_id: u64, leader: BlsPublicKey) {
        let mut state = self.state.lock().await;
        state.view_id = view_id;
        state.view_changing_id = view_id;
        state.leader = Some(leader);
        state.ignore_view_id_check = false;
        self.set_mode_locked(&mut state, Mode::Normal);
        state.timers.stop(TimeoutType::ViewChange);
        state.timers.start(TimeoutType::Consensus);
        self.switch_phase(&mut state, "complete_view_change", Phase::Announce);

        tracing::info!(view_id, leader = %leader, "view change completed");
    }

    /// Signals the syncer that this node is behind. Repeated calls while a
    /// signal is pending do nothing.
    pub async fn spin_up_state_sync(&self) {
        match self.block_num_low.try_send(()) {
            Ok(()) => {
                let mut state = self.state.lock().await;
                self.set_mode_locked(&mut state, Mode::Syncing);
                state.timers.stop_all();
                self.emit(ConsensusEvent::SyncRequested {
                    block_num: state.block_num,
                });
            }
            Err(_) => {
                tracing::debug!("state sync already pending");
            }
        }
    }

    /// Resumes consensus after the syncer caught the chain up.
    pub async fn sync_completed(&self) {
        let mut state = self.state.lock().await;
        let block_num = self.chain.current_block_number() + 1;
        self.set_block_num(&mut state, block_num);
        state.reset_round();
        state.ignore_view_id_check = true;
        self.set_mode_locked(&mut state, Mode::Normal);

        tracing::info!(block_num, "state sync completed");
    }
}

fn log_rejection(err: &ConsensusError) {
    match err.kind() {
        ErrorKind::Stale => tracing::debug!(error = %err, "message rejected"),
        ErrorKind::ModeMismatch => tracing::info!(error = %err, "message rejected"),
        ErrorKind::Malformed | ErrorKind::Verification | ErrorKind::Transport => {
            tracing::warn!(error = %err, "message rejected")
        }
        ErrorKind::Storage | ErrorKind::Config | ErrorKind::Internal => {
            tracing::error!(error = %err, "message processing failed")
        }
    }
}

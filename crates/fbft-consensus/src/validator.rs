//! Validator-side message handlers.
//!
//! A validator follows the leader through three phases:
//!
//! 1. ANNOUNCE: the leader proposes a block hash; validators answer PREPARE.
//! 2. PREPARED: the leader shows a quorum of prepare votes and the block;
//!    validators verify the block and answer COMMIT.
//! 3. COMMITTED: the leader shows a quorum of commit votes; validators
//!    persist the signature and append the block.
//!
//! Every handler validates first and mutates [`ConsensusState`] last, under
//! the state lock.

use crate::block::Block;
use crate::consensus::{Consensus, ConsensusEvent};
use crate::crypto::SIGNATURE_SIZE;
use crate::error::{ConsensusError, Result};
use crate::mask::QuorumMask;
use crate::message::{FbftMessage, MessageType};
use crate::signature::{construct_commit_payload, read_signature_bitmap_payload};
use crate::state::{ConsensusState, Mode, Phase};
use crate::timeout::TimeoutType;
use crate::verify::{verify_quorum, verify_signature};
use tokio::time::Instant;

impl Consensus {
    pub(crate) async fn on_announce(&self, msg: FbftMessage) -> Result<()> {
        self.on_announce_sanity_checks(&msg).await?;

        tracing::debug!(
            msg_view_id = msg.view_id,
            msg_block_num = msg.block_num,
            "announce message added"
        );
        self.fbft_log.add_message(msg.clone());

        let mut state = self.state.lock().await;
        state.block_hash = msg.block_hash;

        // Recorded; replayed once the view change completes.
        if state.mode == Mode::ViewChanging {
            tracing::debug!("still in view changing mode, not preparing");
            return Ok(());
        }

        self.check_view_id(&mut state, &msg)?;
        state.finality_start = Some(Instant::now());
        self.prepare(&mut state).await;
        Ok(())
    }

    async fn on_announce_sanity_checks(&self, msg: &FbftMessage) -> Result<()> {
        let logged =
            self.fbft_log
                .get_messages_by_type_seq_view(MessageType::Announce, msg.block_num, msg.view_id);
        if let Some(prev) = logged.first() {
            if prev.block_hash != msg.block_hash && prev.sender_pubkeys == msg.sender_pubkeys {
                tracing::warn!(
                    msg_block_num = msg.block_num,
                    msg_view_id = msg.view_id,
                    first = %prev.block_hash,
                    second = %msg.block_hash,
                    "leader announced two blocks"
                );
                let mut state = self.state.lock().await;
                if state.mode != Mode::ViewChanging {
                    self.start_view_change_locked(&mut state);
                }
                return Err(ConsensusError::LeaderEquivocation {
                    block_num: msg.block_num,
                    view_id: msg.view_id,
                });
            }
            return Err(ConsensusError::DuplicateAnnounce {
                block_num: msg.block_num,
                view_id: msg.view_id,
            });
        }

        let current = self.block_num();
        if msg.block_num < current {
            return Err(ConsensusError::StaleBlock {
                msg_block_num: msg.block_num,
                current,
            });
        }
        if msg.block_num > current {
            return Err(ConsensusError::FutureBlock {
                msg_block_num: msg.block_num,
                current,
            });
        }

        let (view_id, ignore) = {
            let state = self.state.lock().await;
            (state.view_id, state.ignore_view_id_check)
        };
        if !ignore && msg.view_id != view_id {
            return Err(ConsensusError::ViewIdMismatch {
                msg_view_id: msg.view_id,
                current: view_id,
            });
        }
        Ok(())
    }

    /// Sends PREPARE for the current block hash with every held committee
    /// key and moves to the prepare phase.
    pub(crate) async fn prepare(&self, state: &mut ConsensusState) {
        let committee = self.committee();
        let keys = self.keys_in_committee(&committee);
        let msgs = self.construct_p2p_messages(state, MessageType::Prepare, None, &keys);

        match self.broadcast_consensus_p2p_messages(state.mode, &msgs).await {
            Err(e) => tracing::warn!(error = %e, "cannot send prepare message"),
            Ok(()) => {
                let messages = if state.mode == Mode::Listening { 0 } else { msgs.len() };
                tracing::info!(
                    block_num = state.block_num,
                    block_hash = %state.block_hash,
                    messages,
                    "sent prepare message"
                );
                self.emit(ConsensusEvent::PrepareSent {
                    block_num: state.block_num,
                    block_hash: state.block_hash,
                    messages,
                });
            }
        }

        self.switch_phase(state, "on_announce", Phase::Prepare);
    }

    /// Signs the commit payload of `block` with every held committee key and
    /// broadcasts it.
    pub(crate) async fn send_commit_messages(&self, state: &mut ConsensusState, block: &Block) {
        let commit_payload = construct_commit_payload(
            self.config.staking_epoch,
            block.epoch(),
            &block.hash(),
            block.number(),
            block.view_id(),
        );

        let committee = self.committee();
        let keys = self.keys_in_committee(&committee);
        let msgs =
            self.construct_p2p_messages(state, MessageType::Commit, Some(&commit_payload), &keys);

        match self.broadcast_consensus_p2p_messages(state.mode, &msgs).await {
            Err(e) => tracing::warn!(error = %e, "cannot send commit message"),
            Ok(()) => {
                let messages = if state.mode == Mode::Listening { 0 } else { msgs.len() };
                tracing::info!(
                    block_num = state.block_num,
                    block_hash = %state.block_hash,
                    messages,
                    "sent commit message"
                );
                self.emit(ConsensusEvent::CommitSent {
                    block_num: state.block_num,
                    block_hash: state.block_hash,
                    messages,
                });
            }
        }
    }

    pub(crate) async fn on_prepared(&self, mut msg: FbftMessage) -> Result<()> {
        tracing::info!(
            msg_block_num = msg.block_num,
            msg_view_id = msg.view_id,
            "received prepared message"
        );

        let current = self.block_num();
        if msg.block_num < current {
            return Err(ConsensusError::StaleBlock {
                msg_block_num: msg.block_num,
                current,
            });
        }
        if msg.block_num > current {
            tracing::warn!(
                msg_block_num = msg.block_num,
                block_num = current,
                "low consensus block number, spinning up state sync"
            );
            self.spin_up_state_sync().await;
        }

        let committee = self.committee();
        let prepared = read_signature_bitmap_payload(&msg.payload, 0, &committee)?;
        if !verify_quorum(&committee, &prepared.mask) {
            return Err(ConsensusError::QuorumNotAchieved {
                signers: prepared.mask.count_enabled(),
                committee: committee.len(),
            });
        }
        if !verify_signature(
            self.scheme.as_ref(),
            &committee,
            &prepared.signature,
            &prepared.mask,
            msg.block_hash.as_bytes(),
        ) {
            return Err(ConsensusError::InvalidAggregateSignature { phase: "prepare" });
        }

        let block = Block::decode(&msg.block)?;
        self.on_prepared_sanity_checks(&block, &msg)?;

        let mut state = self.state.lock().await;

        // Never sign a block that was not verified.
        if state.mode != Mode::Normal {
            return Err(ConsensusError::NotNormalMode(state.mode));
        }
        let verifier = self.block_verifier()?;
        verifier
            .verify(&block)
            .map_err(|e| ConsensusError::BlockVerification(e.to_string()))?;

        self.fbft_log.mark_block_verified(&block);
        self.fbft_log.add_block(block.clone());
        state.block = std::mem::take(&mut msg.block);
        self.fbft_log.add_message(msg.clone());
        tracing::debug!(
            msg_view_id = msg.view_id,
            msg_block_num = msg.block_num,
            block_hash = %msg.block_hash,
            "prepared message and block added"
        );

        self.check_view_id(&mut state, &msg)?;
        if msg.block_num > state.block_num {
            return Err(ConsensusError::FutureBlock {
                msg_block_num: msg.block_num,
                current: state.block_num,
            });
        }

        let delay = self.config.delay_commit();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        state.prepare_sig = Some(prepared);
        if state.block_hash.is_zero() {
            state.block_hash = msg.block_hash;
        }

        self.send_commit_messages(&mut state, &block).await;
        self.switch_phase(&mut state, "on_prepared", Phase::Commit);
        Ok(())
    }

    fn on_prepared_sanity_checks(&self, block: &Block, msg: &FbftMessage) -> Result<()> {
        if block.number() != msg.block_num {
            return Err(ConsensusError::InvalidBlock(format!(
                "block number {} does not match message block number {}",
                block.number(),
                msg.block_num
            )));
        }
        let current = self.block_num();
        if msg.block_num < current {
            return Err(ConsensusError::StaleBlock {
                msg_block_num: msg.block_num,
                current,
            });
        }
        if block.hash() != msg.block_hash {
            return Err(ConsensusError::InvalidBlock(format!(
                "block hash {} does not match message block hash {}",
                block.hash(),
                msg.block_hash
            )));
        }
        Ok(())
    }

    pub(crate) async fn on_committed(&self, msg: FbftMessage) -> Result<()> {
        // The previous block's COMMITTED may still arrive with more
        // signatures.
        let current = self.block_num();
        if msg.block_num < current.saturating_sub(1) {
            return Err(ConsensusError::StaleBlock {
                msg_block_num: msg.block_num,
                current,
            });
        }
        if msg.block_num > current {
            tracing::info!(
                msg_block_num = msg.block_num,
                block_num = current,
                "low consensus block number, spinning up state sync"
            );
            self.spin_up_state_sync().await;
        }

        let committee = self.committee();
        let committed = read_signature_bitmap_payload(&msg.payload, 0, &committee)?;
        if !verify_quorum(&committee, &committed.mask) {
            return Err(ConsensusError::QuorumNotAchieved {
                signers: committed.mask.count_enabled(),
                committee: committee.len(),
            });
        }

        let block = self
            .fbft_log
            .get_block_by_hash(&msg.block_hash)
            .ok_or(ConsensusError::BlockNotFound(msg.block_hash))?;
        let commit_payload = construct_commit_payload(
            self.config.staking_epoch,
            block.epoch(),
            &block.hash(),
            block.number(),
            block.view_id(),
        );
        if !verify_signature(
            self.scheme.as_ref(),
            &committee,
            &committed.signature,
            &committed.mask,
            &commit_payload,
        ) {
            return Err(ConsensusError::InvalidAggregateSignature { phase: "commit" });
        }

        self.fbft_log.add_message(msg.clone());

        let mut state = self.state.lock().await;

        let mask = committed.mask.clone();
        state.commit_sig = Some(committed);
        self.persist_commit_sig(block.number(), &msg.payload, &mask);

        if let Err(e) = self.try_catchup(&mut state).await {
            tracing::warn!(error = %e, block_num = state.block_num, "catchup failed");
        }
        if msg.block_num > state.block_num {
            tracing::info!(
                msg_block_num = msg.block_num,
                block_num = state.block_num,
                "out of sync"
            );
            return Ok(());
        }

        if state.mode == Mode::ViewChanging {
            tracing::info!("still in view changing mode, not restarting timers");
            return Ok(());
        }

        if state.timers.is_active(TimeoutType::Bootstrap) {
            state.timers.stop(TimeoutType::Bootstrap);
            tracing::debug!("start consensus timer; stop bootstrap timer only once");
        } else {
            tracing::debug!("start consensus timer");
        }
        state.timers.start(TimeoutType::Consensus);
        Ok(())
    }

    /// Writes `payload` as the commit signature of `block_num` unless the
    /// stored one has at least as many signers.
    fn persist_commit_sig(&self, block_num: u64, payload: &[u8], mask: &QuorumMask) {
        let write = match self.chain.read_commit_sig(block_num) {
            Ok(Some(existing)) if existing.len() == payload.len() => {
                let received = mask.count_enabled();
                let stored = existing
                    .get(SIGNATURE_SIZE..)
                    .and_then(|bitmap| QuorumMask::from_bytes(mask.members(), bitmap).ok())
                    .map(|m| m.count_enabled())
                    .unwrap_or(0);
                if received <= stored {
                    tracing::debug!(
                        block_num,
                        received,
                        stored,
                        "kept stored commit signature"
                    );
                }
                received > stored
            }
            Ok(Some(existing)) => {
                tracing::debug!(
                    block_num,
                    stored_len = existing.len(),
                    received_len = payload.len(),
                    "stored commit signature has a different layout, keeping it"
                );
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(error = %e, block_num, "cannot read commit signature");
                true
            }
        };

        if write {
            if let Err(e) = self.chain.write_commit_sig(block_num, payload) {
                tracing::warn!(error = %e, block_num, "cannot write commit signature");
            }
        }
    }

    /// Commits every block the log holds a COMMITTED message for, starting
    /// at the current block number.
    pub(crate) async fn try_catchup(&self, state: &mut ConsensusState) -> Result<()> {
        while let Some((block, msg)) = self
            .fbft_log
            .get_committed_block_and_msg_from_number(state.block_num)
        {
            if !self.fbft_log.is_block_verified(&block.hash()) {
                let verifier = self.block_verifier()?;
                verifier
                    .verify(&block)
                    .map_err(|e| ConsensusError::BlockVerification(e.to_string()))?;
                self.fbft_log.mark_block_verified(&block);
            }
            self.commit_block(state, &block, &msg)?;
        }
        Ok(())
    }

    fn commit_block(
        &self,
        state: &mut ConsensusState,
        block: &Block,
        committed: &FbftMessage,
    ) -> Result<()> {
        let number = block.number();
        let next_block_num = number.checked_add(1).ok_or_else(|| {
            ConsensusError::InvalidBlock(format!("block number {number} is the last"))
        })?;
        let next_view_id = committed.view_id.checked_add(1).ok_or_else(|| {
            ConsensusError::InvalidBlock(format!("view {} is the last", committed.view_id))
        })?;
        if self.chain.current_block_number() < number {
            self.chain.insert_block(block, &committed.payload)?;
        }

        let finality = state.finality_start.map(|start| start.elapsed());
        self.set_block_num(state, next_block_num);
        state.view_id = next_view_id;
        state.view_changing_id = state.view_id;
        if let Some(leader) = committed.sender_pubkeys.first() {
            state.leader = Some(*leader);
        }
        self.fbft_log.prune_before(number);
        state.reset_round();

        tracing::info!(
            block_num = number,
            block_hash = %block.hash(),
            view_id = committed.view_id,
            finality_ms = finality.map(|d| d.as_millis() as u64),
            "committed block"
        );
        self.emit(ConsensusEvent::BlockCommitted {
            block_num: number,
            block_hash: block.hash(),
            view_id: committed.view_id,
            finality,
        });
        Ok(())
    }

    /// Checks the message view against ours. While the check is being
    /// ignored, adopts the message view and sender as leader instead.
    pub(crate) fn check_view_id(&self, state: &mut ConsensusState, msg: &FbftMessage) -> Result<()> {
        if state.ignore_view_id_check {
            if !msg.has_single_sender() {
                return Err(ConsensusError::MultipleSenders(msg.sender_pubkeys.len()));
            }
            state.view_id = msg.view_id;
            state.view_changing_id = msg.view_id;
            state.leader = Some(msg.sender_pubkeys[0]);
            self.set_mode_locked(state, Mode::Normal);
            state.ignore_view_id_check = false;
            state.timers.start(TimeoutType::Consensus);
            tracing::debug!(
                view_id = msg.view_id,
                leader = %msg.sender_pubkeys[0],
                "adopted view and leader, start consensus timer"
            );
            return Ok(());
        }

        if msg.view_id > state.view_id {
            return Err(ConsensusError::ViewIdMismatch {
                msg_view_id: msg.view_id,
                current: state.view_id,
            });
        }
        if msg.view_id < state.view_id {
            return Err(ConsensusError::ViewIdInPast {
                msg_view_id: msg.view_id,
                current: state.view_id,
            });
        }
        Ok(())
    }
}

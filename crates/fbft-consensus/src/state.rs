//! Round state of the consensus state machine.

use crate::crypto::BlsPublicKey;
use crate::signature::SignatureBitmap;
use crate::timeout::Timers;
use crate::types::BlockHash;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Phase of the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    /// Waiting for the leader's announce.
    #[default]
    Announce,
    /// Prepare vote sent, waiting for PREPARED.
    Prepare,
    /// Commit vote sent, waiting for COMMITTED.
    Commit,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Announce => write!(f, "announce"),
            Phase::Prepare => write!(f, "prepare"),
            Phase::Commit => write!(f, "commit"),
        }
    }
}

/// Operating mode of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Taking part in consensus.
    #[default]
    Normal,
    /// Waiting for a view change to complete.
    ViewChanging,
    /// Observer: follows consensus but never sends.
    Listening,
    /// Behind peers; an external syncer is catching up.
    Syncing,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Normal => write!(f, "normal"),
            Mode::ViewChanging => write!(f, "view_changing"),
            Mode::Listening => write!(f, "listening"),
            Mode::Syncing => write!(f, "syncing"),
        }
    }
}

/// Mutable round state, guarded by the consensus state lock.
#[derive(Debug)]
pub struct ConsensusState {
    /// Number of the block being agreed on.
    pub block_num: u64,
    /// Hash of the block being agreed on, zero until known.
    pub block_hash: BlockHash,
    /// Current view.
    pub view_id: u64,
    /// View being moved to while view changing.
    pub view_changing_id: u64,
    /// Current phase.
    pub phase: Phase,
    /// Current mode.
    pub mode: Mode,
    /// Current leader key.
    pub leader: Option<BlsPublicKey>,
    /// Encoded block received with PREPARED.
    pub block: Bytes,
    /// Aggregated prepare signature accepted this round.
    pub prepare_sig: Option<SignatureBitmap>,
    /// Aggregated commit signature accepted last.
    pub commit_sig: Option<SignatureBitmap>,
    /// Round timers.
    pub timers: Timers,
    /// Adopt the view and leader of the next leader message instead of
    /// checking them.
    pub ignore_view_id_check: bool,
    /// When the announce of the current round was accepted.
    pub finality_start: Option<Instant>,
}

impl ConsensusState {
    /// Creates the state for a node about to work on `block_num`.
    pub fn new(block_num: u64, timers: Timers) -> Self {
        Self {
            block_num,
            block_hash: BlockHash::ZERO,
            view_id: 0,
            view_changing_id: 0,
            phase: Phase::Announce,
            mode: Mode::Normal,
            leader: None,
            block: Bytes::new(),
            prepare_sig: None,
            commit_sig: None,
            timers,
            ignore_view_id_check: false,
            finality_start: None,
        }
    }

    /// Moves to `phase`. Returns the previous phase if it changed.
    pub fn switch_phase(&mut self, phase: Phase) -> Option<Phase> {
        if self.phase == phase {
            return None;
        }
        let old = self.phase;
        self.phase = phase;
        Some(old)
    }

    /// Moves to `mode`. Returns the previous mode if it changed.
    pub fn set_mode(&mut self, mode: Mode) -> Option<Mode> {
        if self.mode == mode {
            return None;
        }
        let old = self.mode;
        self.mode = mode;
        Some(old)
    }

    /// Clears per-round data before the next block.
    pub fn reset_round(&mut self) {
        self.phase = Phase::Announce;
        self.block_hash = BlockHash::ZERO;
        self.block = Bytes::new();
        self.prepare_sig = None;
        self.commit_sig = None;
        self.finality_start = None;
    }

    /// Returns a read-only copy for observers.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            block_num: self.block_num,
            block_hash: self.block_hash,
            view_id: self.view_id,
            view_changing_id: self.view_changing_id,
            phase: self.phase,
            mode: self.mode,
            leader: self.leader,
            prepare_signers: self.prepare_sig.as_ref().map(|s| s.mask.count_enabled()),
            commit_signers: self.commit_sig.as_ref().map(|s| s.mask.count_enabled()),
            ignore_view_id_check: self.ignore_view_id_check,
        }
    }
}

/// Point-in-time view of [`ConsensusState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    /// Number of the block being agreed on.
    pub block_num: u64,
    /// Hash of the block being agreed on.
    pub block_hash: BlockHash,
    /// Current view.
    pub view_id: u64,
    /// Pending view while view changing.
    pub view_changing_id: u64,
    /// Current phase.
    pub phase: Phase,
    /// Current mode.
    pub mode: Mode,
    /// Current leader.
    pub leader: Option<BlsPublicKey>,
    /// Signers of the accepted prepare signature.
    pub prepare_signers: Option<usize>,
    /// Signers of the accepted commit signature.
    pub commit_signers: Option<usize>,
    /// Whether the next leader message sets the view.
    pub ignore_view_id_check: bool,
}

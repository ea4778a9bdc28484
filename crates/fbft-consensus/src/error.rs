//! Consensus error types.

use crate::state::Mode;
use crate::types::BlockHash;
use thiserror::Error;

/// Errors that can occur while processing consensus messages.
///
/// Almost every variant is a *rejection*: the message that caused it is
/// dropped and shared state is left untouched. [`ConsensusError::kind`]
/// groups variants so callers can pick a log level.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The raw message could not be decoded.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The message type byte is unknown.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// The message targets another shard.
    #[error("wrong shard: expected {expected}, got {got}")]
    WrongShard {
        /// Our shard.
        expected: u32,
        /// Shard carried by the message.
        got: u32,
    },

    /// A sender key is not part of the current committee.
    #[error("sender not in committee: {0}")]
    SenderNotInCommittee(String),

    /// The envelope signature does not verify.
    #[error("invalid message signature")]
    InvalidMessageSignature,

    /// A leader-only message was not sent by the current leader.
    #[error("message not from leader: {0}")]
    NotFromLeader(String),

    /// The message refers to a block we have already moved past.
    #[error("stale block number {msg_block_num}, current {current}")]
    StaleBlock {
        /// Block number in the message.
        msg_block_num: u64,
        /// Our current block number.
        current: u64,
    },

    /// The message refers to a block we have not reached yet.
    #[error("future block number {msg_block_num}, current {current}")]
    FutureBlock {
        /// Block number in the message.
        msg_block_num: u64,
        /// Our current block number.
        current: u64,
    },

    /// The message view ID is ahead of ours.
    #[error("view id mismatch: message {msg_view_id}, current {current}")]
    ViewIdMismatch {
        /// View ID in the message.
        msg_view_id: u64,
        /// Our current view ID.
        current: u64,
    },

    /// The message view ID belongs to the past.
    #[error("view id {msg_view_id} belongs to the past, current {current}")]
    ViewIdInPast {
        /// View ID in the message.
        msg_view_id: u64,
        /// Our current view ID.
        current: u64,
    },

    /// An announce for this block number and view was already recorded.
    #[error("duplicate announce for block {block_num} view {view_id}")]
    DuplicateAnnounce {
        /// Block number.
        block_num: u64,
        /// View ID.
        view_id: u64,
    },

    /// The leader announced two different blocks for the same slot.
    #[error("leader equivocation at block {block_num} view {view_id}")]
    LeaderEquivocation {
        /// Block number.
        block_num: u64,
        /// View ID.
        view_id: u64,
    },

    /// A leader message carried more than one sender key.
    #[error("leader message must have a single sender, got {0}")]
    MultipleSenders(usize),

    /// The signature/bitmap payload is malformed.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The participation bitmap length does not match the committee.
    #[error("mismatching bitmap lengths: expected {expected}, got {got}")]
    BitmapLength {
        /// Expected byte length.
        expected: usize,
        /// Received byte length.
        got: usize,
    },

    /// Not enough voting power signed.
    #[error("quorum not achieved: {signers} of {committee} signed")]
    QuorumNotAchieved {
        /// Number of enabled signers.
        signers: usize,
        /// Committee size.
        committee: usize,
    },

    /// The aggregate signature does not verify.
    #[error("failed to verify aggregate signature for {phase} phase")]
    InvalidAggregateSignature {
        /// Phase whose signature failed.
        phase: &'static str,
    },

    /// The embedded block could not be decoded or is inconsistent.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// A referenced block is not in the FBFT log.
    #[error("block not found: {0}")]
    BlockNotFound(BlockHash),

    /// The node is not in normal mode.
    #[error("not in normal mode: {0}")]
    NotNormalMode(Mode),

    /// No block verifier has been installed yet.
    #[error("block verifier not set")]
    VerifierUnset,

    /// The external block verifier rejected the block.
    #[error("block verification failed: {0}")]
    BlockVerification(String),

    /// Signing with a local key failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The transport could not send a message.
    #[error("transport error: {0}")]
    Transport(String),

    /// The blockchain store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of [`ConsensusError`] used to choose log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unparseable or inconsistent input.
    Malformed,
    /// Out-of-window block number or view ID; superseded by later messages.
    Stale,
    /// Signature, quorum or block verification failure.
    Verification,
    /// Wrong mode or not yet initialized.
    ModeMismatch,
    /// Network send failure.
    Transport,
    /// Blockchain store failure.
    Storage,
    /// Configuration problem.
    Config,
    /// Local failure (signing, serialization).
    Internal,
}

impl ConsensusError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        use ConsensusError::*;
        match self {
            MalformedMessage(_)
            | UnknownMessageType(_)
            | InvalidPayload(_)
            | BitmapLength { .. }
            | InvalidBlock(_)
            | MultipleSenders(_) => ErrorKind::Malformed,
            WrongShard { .. }
            | StaleBlock { .. }
            | FutureBlock { .. }
            | ViewIdMismatch { .. }
            | ViewIdInPast { .. }
            | DuplicateAnnounce { .. }
            | BlockNotFound(_) => ErrorKind::Stale,
            SenderNotInCommittee(_)
            | InvalidMessageSignature
            | NotFromLeader(_)
            | LeaderEquivocation { .. }
            | QuorumNotAchieved { .. }
            | InvalidAggregateSignature { .. }
            | BlockVerification(_) => ErrorKind::Verification,
            NotNormalMode(_) | VerifierUnset => ErrorKind::ModeMismatch,
            Transport(_) => ErrorKind::Transport,
            Storage(_) => ErrorKind::Storage,
            InvalidConfig(_) => ErrorKind::Config,
            Signing(_) | Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// A specialized Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;

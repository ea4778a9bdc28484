//! FBFT Validator Consensus
//!
//! This crate implements the validator side of Fast Byzantine Fault Tolerance
//! (FBFT) for one shard of a sharded chain. A designated leader drives each
//! round; validators vote with BLS signatures and follow the leader through
//! three phases until the block is committed.
//!
//! # Components
//!
//! - [`Consensus`]: Round state, message dispatch, timers and view changes
//! - [`FbftLog`]: Blocks and messages of recent rounds
//! - [`QuorumMask`]: Bitmap of which committee members signed
//! - [`Committee`]: Voting members of the current epoch and the quorum rule
//! - [`SignedMessage`]: Wire envelope of consensus messages
//! - [`ConsensusConfig`]: Timeouts, signing mode and commit delay
//!
//! # Round Flow
//!
//! ```text
//! ┌──────────────┐  ANNOUNCE   ┌──────────────┐   PREPARE   ┌──────────────┐
//! │    Leader    │────────────▶│  Validator   │────────────▶│    Leader    │
//! │  (proposes)  │             │ (on_announce)│             │  (collects)  │
//! └──────────────┘             └──────────────┘             └──────┬───────┘
//!                                                                  │ PREPARED
//!                                                                  ▼
//! ┌──────────────┐   COMMIT    ┌──────────────┐             ┌──────────────┐
//! │    Leader    │◀────────────│  Validator   │◀────────────│ 2/3 prepare  │
//! │  (collects)  │             │ (on_prepared)│             │  signatures  │
//! └──────┬───────┘             └──────────────┘             └──────────────┘
//!        │ COMMITTED
//!        ▼
//! ┌──────────────┐             ┌──────────────────────────────────┐
//! │  Validator   │────────────▶│  Persist commit signature,       │
//! │(on_committed)│             │  append block, next round        │
//! └──────────────┘             └──────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use fbft_consensus::{Consensus, ConsensusConfig};
//!
//! let (consensus, mut sync_rx) =
//!     Consensus::new(config, keys, scheme, committee, chain, transport)?;
//! consensus.set_block_verifier(verifier);
//!
//! let consensus = Arc::new(consensus);
//! tokio::spawn(consensus.clone().run(inbound));
//!
//! while sync_rx.recv().await.is_some() {
//!     syncer.catch_up().await?;
//!     consensus.sync_completed().await;
//! }
//! ```

mod block;
mod committee;
mod config;
mod consensus;
mod construct;
mod crypto;
mod error;
mod fbft_log;
mod mask;
mod message;
mod signature;
mod state;
mod timeout;
mod traits;
mod types;
mod validator;
mod verify;

#[cfg(test)]
pub(crate) mod testing;

pub use block::{Block, BlockHeader};
pub use committee::{Committee, CommitteeMember, QuorumPolicy};
pub use config::{CommitteeConfig, CommitteeMemberConfig, ConsensusConfig, MAX_DELAY_COMMIT_MS};
pub use consensus::{Consensus, ConsensusEvent};
pub use construct::NetworkMessage;
pub use crypto::{
    sign_aggregate, BlsPublicKey, BlsScheme, BlsSecretKey, BlsSignature, PrivateKeyWrapper,
    PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE,
};
pub use error::{ConsensusError, ErrorKind, Result};
pub use fbft_log::FbftLog;
pub use mask::QuorumMask;
pub use message::{FbftMessage, MessageType, SignedMessage, MAX_SENDERS, WIRE_VERSION};
pub use signature::{
    construct_commit_payload, read_signature_bitmap_payload, signature_bitmap_payload,
    SignatureBitmap,
};
pub use state::{ConsensusState, Mode, Phase, StateSnapshot};
pub use timeout::{Timeout, TimeoutType, Timers};
pub use traits::{BlockVerifier, Blockchain, MessageSender};
pub use types::{BlockHash, GroupId, ShardId};
pub use verify::{verify_quorum, verify_signature};

//! Collaborator interfaces.
//!
//! Block validation, chain storage and the p2p layer live outside the
//! consensus core and are reached through these traits.

use crate::block::Block;
use crate::error::Result;
use crate::types::GroupId;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Validates a candidate block before this node signs it.
pub trait BlockVerifier: Send + Sync {
    /// Returns an error if the block must not be signed.
    fn verify(&self, block: &Block) -> Result<()>;
}

impl<F> BlockVerifier for F
where
    F: Fn(&Block) -> Result<()> + Send + Sync,
{
    fn verify(&self, block: &Block) -> Result<()> {
        self(block)
    }
}

/// The node's view of the chain.
pub trait Blockchain: Send + Sync {
    /// Number of the latest block in the chain.
    fn current_block_number(&self) -> u64;

    /// Reads the persisted `signature || bitmap` of block `block_num`.
    fn read_commit_sig(&self, block_num: u64) -> Result<Option<Bytes>>;

    /// Persists the `signature || bitmap` of block `block_num`.
    fn write_commit_sig(&self, block_num: u64, commit_sig: &[u8]) -> Result<()>;

    /// Appends a committed block together with its commit signature.
    fn insert_block(&self, block: &Block, commit_sig: &[u8]) -> Result<()>;
}

impl<T: Blockchain> Blockchain for Arc<T> {
    fn current_block_number(&self) -> u64 {
        (**self).current_block_number()
    }

    fn read_commit_sig(&self, block_num: u64) -> Result<Option<Bytes>> {
        (**self).read_commit_sig(block_num)
    }

    fn write_commit_sig(&self, block_num: u64, commit_sig: &[u8]) -> Result<()> {
        (**self).write_commit_sig(block_num, commit_sig)
    }

    fn insert_block(&self, block: &Block, commit_sig: &[u8]) -> Result<()> {
        (**self).insert_block(block, commit_sig)
    }
}

/// Best-effort message transport.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sends `message` to every peer in `groups` once. No retry.
    async fn send_without_retry(&self, groups: &[GroupId], message: Bytes) -> Result<()>;
}

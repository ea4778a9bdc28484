//! Candidate block structure.
//!
//! Block production and execution live outside this crate; consensus only
//! needs a header it can hash and a body it can carry around as opaque bytes.

use crate::error::{ConsensusError, Result};
use crate::types::{BlockHash, ShardId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A block header containing the fields consensus signs over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Shard the block belongs to.
    pub shard_id: ShardId,

    /// Epoch of the block.
    pub epoch: u64,

    /// Block number (0 = genesis).
    pub number: u64,

    /// View in which the block was proposed.
    pub view_id: u64,

    /// Parent block hash.
    pub parent_hash: BlockHash,

    /// Timestamp (unix milliseconds).
    pub timestamp: u64,

    /// Merkle root of transactions.
    pub tx_root: [u8; 32],
}

impl BlockHeader {
    /// Computes the block hash from the header.
    pub fn hash(&self) -> BlockHash {
        // Serializing a plain struct of integers and byte arrays cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        BlockHash::digest(&bytes)
    }
}

/// A full block containing header and transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header.
    pub header: BlockHeader,

    /// Ordered, opaque transactions.
    pub transactions: Vec<Vec<u8>>,
}

impl Block {
    /// Creates a new block.
    pub fn new(
        shard_id: ShardId,
        epoch: u64,
        number: u64,
        view_id: u64,
        parent_hash: BlockHash,
        timestamp: u64,
        transactions: Vec<Vec<u8>>,
    ) -> Self {
        let tx_root = Self::compute_tx_root(&transactions);

        Self {
            header: BlockHeader {
                shard_id,
                epoch,
                number,
                view_id,
                parent_hash,
                timestamp,
                tx_root,
            },
            transactions,
        }
    }

    /// Returns the block hash.
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    /// Returns the block number.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Returns the epoch.
    pub fn epoch(&self) -> u64 {
        self.header.epoch
    }

    /// Returns the view ID the block was proposed in.
    pub fn view_id(&self) -> u64 {
        self.header.view_id
    }

    /// Returns the parent hash.
    pub fn parent_hash(&self) -> BlockHash {
        self.header.parent_hash
    }

    /// Encodes the block into the bytes carried by consensus messages.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decodes a block from message bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(ConsensusError::InvalidBlock("empty block bytes".into()));
        }
        serde_json::from_slice(data).map_err(|e| ConsensusError::InvalidBlock(e.to_string()))
    }

    /// Verifies the transaction root matches.
    pub fn verify_tx_root(&self) -> bool {
        Self::compute_tx_root(&self.transactions) == self.header.tx_root
    }

    /// Computes the Merkle root of transactions.
    fn compute_tx_root(transactions: &[Vec<u8>]) -> [u8; 32] {
        if transactions.is_empty() {
            return [0u8; 32];
        }

        let mut hashes: Vec<[u8; 32]> = transactions
            .iter()
            .map(|tx| Sha256::digest(tx).into())
            .collect();

        while hashes.len() > 1 {
            hashes = hashes
                .chunks(2)
                .map(|pair| {
                    let mut hasher = Sha256::new();
                    hasher.update(pair[0]);
                    // Duplicate the last hash on odd levels.
                    hasher.update(pair.get(1).unwrap_or(&pair[0]));
                    hasher.finalize().into()
                })
                .collect();
        }

        hashes[0]
    }
}

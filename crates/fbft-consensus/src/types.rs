//! Basic identifiers shared across the crate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Shard identifier.
pub type ShardId = u32;

/// A 32-byte block digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// The all-zero hash, used as "unset".
    pub const ZERO: Self = Self([0u8; 32]);

    /// Length of a block hash in bytes.
    pub const LEN: usize = 32;

    /// Creates a block hash from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Computes the SHA-256 digest of `data`.
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns true if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creates a block hash from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Default for BlockHash {
    fn default() -> Self {
        Self::ZERO
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A multicast group on the p2p layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId(String);

impl GroupId {
    /// The consensus group of a shard.
    pub fn shard(shard_id: ShardId) -> Self {
        Self(format!("fbft/shard/{shard_id}"))
    }

    /// Returns the group name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_hex_roundtrip() {
        let hash = BlockHash::from_bytes([0xab; 32]);
        let parsed = BlockHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
        assert!(BlockHash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_zero_hash() {
        assert!(BlockHash::ZERO.is_zero());
        assert!(BlockHash::default().is_zero());
        assert!(!BlockHash::digest(b"block").is_zero());
    }

    #[test]
    fn test_group_id() {
        assert_eq!(GroupId::shard(3).as_str(), "fbft/shard/3");
        assert_ne!(GroupId::shard(0), GroupId::shard(1));
    }
}

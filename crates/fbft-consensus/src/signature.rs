//! Signed payload layouts.
//!
//! Aggregated votes travel as `signature || bitmap`: a fixed-size BLS
//! signature followed by one bit per committee member.

use crate::committee::Committee;
use crate::crypto::{BlsSignature, SIGNATURE_SIZE};
use crate::error::{ConsensusError, Result};
use crate::mask::QuorumMask;
use crate::types::BlockHash;
use bytes::{BufMut, Bytes, BytesMut};

/// Builds the bytes validators sign in the commit phase.
///
/// Layout: `block_num (u64 LE) || block_hash`, extended with
/// `view_id (u64 LE)` from `staking_epoch` onwards.
pub fn construct_commit_payload(
    staking_epoch: u64,
    epoch: u64,
    block_hash: &BlockHash,
    block_num: u64,
    view_id: u64,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + BlockHash::LEN + 8);
    payload.extend_from_slice(&block_num.to_le_bytes());
    payload.extend_from_slice(block_hash.as_bytes());
    if epoch >= staking_epoch {
        payload.extend_from_slice(&view_id.to_le_bytes());
    }
    payload
}

/// An aggregate signature with its participation mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBitmap {
    /// Aggregate signature.
    pub signature: BlsSignature,
    /// Members whose signatures were aggregated.
    pub mask: QuorumMask,
}

impl SignatureBitmap {
    /// Serializes as `signature || bitmap`.
    pub fn to_payload(&self) -> Bytes {
        signature_bitmap_payload(&self.signature, &self.mask)
    }
}

/// Reads `signature || bitmap` starting at `offset`.
pub fn read_signature_bitmap_payload(
    payload: &[u8],
    offset: usize,
    committee: &Committee,
) -> Result<SignatureBitmap> {
    let rest = payload
        .get(offset..)
        .filter(|rest| rest.len() >= SIGNATURE_SIZE)
        .ok_or_else(|| {
            ConsensusError::InvalidPayload(format!(
                "payload too short: {} bytes at offset {}",
                payload.len(),
                offset
            ))
        })?;

    let (sig_bytes, bitmap) = rest.split_at(SIGNATURE_SIZE);
    let signature = BlsSignature::from_slice(sig_bytes)?;
    let mask = QuorumMask::from_bytes(committee.len(), bitmap)?;

    Ok(SignatureBitmap { signature, mask })
}

/// Serializes a signature and mask as `signature || bitmap`.
pub fn signature_bitmap_payload(signature: &BlsSignature, mask: &QuorumMask) -> Bytes {
    let mut buf = BytesMut::with_capacity(SIGNATURE_SIZE + mask.as_bytes().len());
    buf.put_slice(signature.as_bytes());
    buf.put_slice(mask.as_bytes());
    buf.freeze()
}

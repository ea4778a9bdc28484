//! Participation bitmaps over committee members.

use crate::error::{ConsensusError, Result};

/// A bitmap marking which committee members contributed to an aggregate
/// signature.
///
/// Member `i` maps to byte `i / 8`, bit `1 << (i % 8)`. Bits past the
/// committee size must stay zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumMask {
    members: usize,
    bitmap: Vec<u8>,
}

impl QuorumMask {
    /// Creates an empty mask for a committee of `members`.
    pub fn new(members: usize) -> Self {
        Self {
            members,
            bitmap: vec![0u8; Self::byte_len(members)],
        }
    }

    /// Creates a mask from a received bitmap.
    pub fn from_bytes(members: usize, bitmap: &[u8]) -> Result<Self> {
        let mut mask = Self::new(members);
        mask.set_mask(bitmap)?;
        Ok(mask)
    }

    /// Number of bytes needed for `members` bits.
    pub fn byte_len(members: usize) -> usize {
        members.div_ceil(8)
    }

    /// Overwrites the whole bitmap.
    pub fn set_mask(&mut self, bitmap: &[u8]) -> Result<()> {
        if bitmap.len() != self.bitmap.len() {
            return Err(ConsensusError::BitmapLength {
                expected: self.bitmap.len(),
                got: bitmap.len(),
            });
        }
        let used_bits = self.members % 8;
        if used_bits != 0 {
            if let Some(last) = bitmap.last() {
                if last >> used_bits != 0 {
                    return Err(ConsensusError::InvalidPayload(
                        "bitmap enables members outside the committee".into(),
                    ));
                }
            }
        }
        self.bitmap.copy_from_slice(bitmap);
        Ok(())
    }

    /// Enables or disables member `index`.
    pub fn set_bit(&mut self, index: usize, enabled: bool) -> Result<()> {
        if index >= self.members {
            return Err(ConsensusError::InvalidPayload(format!(
                "member index {} out of range for committee of {}",
                index, self.members
            )));
        }
        let bit = 1u8 << (index % 8);
        if enabled {
            self.bitmap[index / 8] |= bit;
        } else {
            self.bitmap[index / 8] &= !bit;
        }
        Ok(())
    }

    /// Returns true if member `index` is enabled.
    pub fn is_enabled(&self, index: usize) -> bool {
        index < self.members && self.bitmap[index / 8] & (1u8 << (index % 8)) != 0
    }

    /// Returns the number of enabled members.
    pub fn count_enabled(&self) -> usize {
        self.bitmap.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Returns the indices of enabled members in ascending order.
    pub fn enabled_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.members).filter(|&i| self.is_enabled(i))
    }

    /// Returns the committee size this mask covers.
    pub fn members(&self) -> usize {
        self.members
    }

    /// Returns the raw bitmap.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bitmap
    }
}

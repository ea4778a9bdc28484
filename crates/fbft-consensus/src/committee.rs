//! Committee membership and quorum decisions.
//!
//! The committee for an epoch is computed elsewhere; this module holds the
//! result and answers "is this key a member" and "did enough power sign".

use crate::crypto::BlsPublicKey;
use crate::error::{ConsensusError, Result};
use crate::mask::QuorumMask;
use crate::types::ShardId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How quorum is decided over a participation mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumPolicy {
    /// One member, one vote: more than two thirds of members must sign.
    #[default]
    SuperMajorityVote,
    /// Stake weighted: more than two thirds of voting power must sign.
    SuperMajorityStake,
}

/// A committee member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeMember {
    /// Member's BLS public key.
    pub public_key: BlsPublicKey,

    /// Voting power.
    pub voting_power: u64,
}

impl CommitteeMember {
    /// Creates a new member.
    pub fn new(public_key: BlsPublicKey, voting_power: u64) -> Self {
        Self {
            public_key,
            voting_power,
        }
    }
}

/// The ordered committee of a shard for one epoch.
///
/// Member order defines bitmap positions.
#[derive(Debug, Clone)]
pub struct Committee {
    epoch: u64,
    shard_id: ShardId,
    policy: QuorumPolicy,
    members: Vec<CommitteeMember>,
    index: HashMap<BlsPublicKey, usize>,
}

impl Committee {
    /// Creates a committee, rejecting empty sets and duplicate keys.
    pub fn new(
        epoch: u64,
        shard_id: ShardId,
        policy: QuorumPolicy,
        members: Vec<CommitteeMember>,
    ) -> Result<Self> {
        if members.is_empty() {
            return Err(ConsensusError::InvalidConfig("committee is empty".into()));
        }

        let mut index = HashMap::with_capacity(members.len());
        for (i, member) in members.iter().enumerate() {
            if index.insert(member.public_key, i).is_some() {
                return Err(ConsensusError::InvalidConfig(format!(
                    "duplicate committee member: {}",
                    member.public_key
                )));
            }
        }

        let committee = Self {
            epoch,
            shard_id,
            policy,
            members,
            index,
        };

        if committee.policy == QuorumPolicy::SuperMajorityStake && committee.total_power() == 0 {
            return Err(ConsensusError::InvalidConfig(
                "stake policy requires non-zero voting power".into(),
            ));
        }

        Ok(committee)
    }

    /// Creates a one-vote-per-member committee.
    pub fn uniform(epoch: u64, shard_id: ShardId, public_keys: Vec<BlsPublicKey>) -> Result<Self> {
        let members = public_keys
            .into_iter()
            .map(|pk| CommitteeMember::new(pk, 1))
            .collect();
        Self::new(epoch, shard_id, QuorumPolicy::SuperMajorityVote, members)
    }

    /// Returns the epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns the shard.
    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// Returns the quorum policy.
    pub fn policy(&self) -> QuorumPolicy {
        self.policy
    }

    /// Returns all members in bitmap order.
    pub fn members(&self) -> &[CommitteeMember] {
        &self.members
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if there are no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns the position of `public_key` in the committee.
    pub fn index_of(&self, public_key: &BlsPublicKey) -> Option<usize> {
        self.index.get(public_key).copied()
    }

    /// Checks if `public_key` is a committee member.
    pub fn is_validator_in_committee(&self, public_key: &BlsPublicKey) -> bool {
        self.index.contains_key(public_key)
    }

    /// Returns the total voting power. Summed as `u128` so any committee of
    /// `u64` stakes fits.
    pub fn total_power(&self) -> u128 {
        self.members.iter().map(|m| u128::from(m.voting_power)).sum()
    }

    /// Minimum number of signers under [`QuorumPolicy::SuperMajorityVote`].
    pub fn quorum_threshold(&self) -> usize {
        self.members.len() * 2 / 3 + 1
    }

    /// Creates an empty mask sized for this committee.
    pub fn new_mask(&self) -> QuorumMask {
        QuorumMask::new(self.members.len())
    }

    /// Builds a mask enabling the given keys. Unknown keys are an error.
    pub fn mask_for_keys<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a BlsPublicKey>,
    ) -> Result<QuorumMask> {
        let mut mask = self.new_mask();
        for key in keys {
            let index = self
                .index_of(key)
                .ok_or_else(|| ConsensusError::SenderNotInCommittee(key.to_hex()))?;
            mask.set_bit(index, true)?;
        }
        Ok(mask)
    }

    /// Returns the public keys enabled in `mask`.
    pub fn signers(&self, mask: &QuorumMask) -> Vec<BlsPublicKey> {
        mask.enabled_indices()
            .filter_map(|i| self.members.get(i))
            .map(|m| m.public_key)
            .collect()
    }

    /// Returns the voting power enabled in `mask`.
    pub fn signed_power(&self, mask: &QuorumMask) -> u128 {
        mask.enabled_indices()
            .filter_map(|i| self.members.get(i))
            .map(|m| u128::from(m.voting_power))
            .sum()
    }

    /// Decides whether the members enabled in `mask` form a quorum.
    pub fn is_quorum_achieved_by_mask(&self, mask: &QuorumMask) -> bool {
        if mask.members() != self.members.len() {
            return false;
        }
        match self.policy {
            QuorumPolicy::SuperMajorityVote => mask.count_enabled() >= self.quorum_threshold(),
            QuorumPolicy::SuperMajorityStake => {
                self.signed_power(mask) * 3 > self.total_power() * 2
            }
        }
    }
}

//! Consensus and committee configuration.

use crate::committee::{Committee, CommitteeMember, QuorumPolicy};
use crate::crypto::BlsPublicKey;
use crate::error::{ConsensusError, Result};
use crate::types::ShardId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound on the commit delay.
pub const MAX_DELAY_COMMIT_MS: u64 = 10_000;

/// Consensus parameters of a validator node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Shard this node validates.
    pub shard_id: ShardId,

    /// Sign one joint message with all held keys instead of one per key.
    pub aggregate_sig: bool,

    /// Pause before sending the commit vote.
    pub delay_commit_ms: u64,

    /// How long to wait for the first committed block.
    pub bootstrap_timeout_ms: u64,

    /// How long to wait for each subsequent committed block.
    pub consensus_timeout_ms: u64,

    /// How long a single view change may take.
    pub view_change_timeout_ms: u64,

    /// Timer polling interval of the event loop.
    pub timer_tick_ms: u64,

    /// First epoch whose commit payload includes the view ID.
    pub staking_epoch: u64,

    /// Capacity of the event channel.
    pub mailbox_size: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            shard_id: 0,
            aggregate_sig: true,
            delay_commit_ms: 0,
            bootstrap_timeout_ms: 120_000,
            consensus_timeout_ms: 27_000,
            view_change_timeout_ms: 27_000,
            timer_tick_ms: 100,
            staking_epoch: 0,
            mailbox_size: 1024,
        }
    }
}

impl ConsensusConfig {
    /// Loads and validates a JSON config file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_file(path.as_ref())?;
        let config: ConsensusConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a YAML config file.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_file(path.as_ref())?;
        let config: ConsensusConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConsensusError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.delay_commit_ms > MAX_DELAY_COMMIT_MS {
            return Err(ConsensusError::InvalidConfig(format!(
                "delay_commit_ms {} exceeds {}",
                self.delay_commit_ms, MAX_DELAY_COMMIT_MS
            )));
        }
        if self.bootstrap_timeout_ms == 0
            || self.consensus_timeout_ms == 0
            || self.view_change_timeout_ms == 0
        {
            return Err(ConsensusError::InvalidConfig(
                "timeouts must be non-zero".into(),
            ));
        }
        if self.timer_tick_ms == 0 {
            return Err(ConsensusError::InvalidConfig(
                "timer_tick_ms must be non-zero".into(),
            ));
        }
        if self.mailbox_size == 0 {
            return Err(ConsensusError::InvalidConfig(
                "mailbox_size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Commit delay as a duration.
    pub fn delay_commit(&self) -> Duration {
        Duration::from_millis(self.delay_commit_ms)
    }

    /// Bootstrap timeout as a duration.
    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    /// Consensus timeout as a duration.
    pub fn consensus_timeout(&self) -> Duration {
        Duration::from_millis(self.consensus_timeout_ms)
    }

    /// View change timeout as a duration.
    pub fn view_change_timeout(&self) -> Duration {
        Duration::from_millis(self.view_change_timeout_ms)
    }

    /// Timer tick as a duration.
    pub fn timer_tick(&self) -> Duration {
        Duration::from_millis(self.timer_tick_ms)
    }
}

/// A committee member entry in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeMemberConfig {
    /// Hex-encoded BLS public key.
    pub public_key: String,

    /// Voting power.
    #[serde(default = "default_voting_power")]
    pub voting_power: u64,
}

fn default_voting_power() -> u64 {
    1
}

/// Committee of a shard for one epoch, as written in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeConfig {
    /// Epoch the committee serves.
    #[serde(default)]
    pub epoch: u64,

    /// Shard the committee serves.
    #[serde(default)]
    pub shard_id: ShardId,

    /// Quorum policy.
    #[serde(default)]
    pub policy: QuorumPolicy,

    /// Members in bitmap order.
    pub members: Vec<CommitteeMemberConfig>,
}

impl CommitteeConfig {
    /// Loads and validates a JSON committee file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_file(path.as_ref())?;
        let config: CommitteeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a YAML committee file.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_file(path.as_ref())?;
        let config: CommitteeConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConsensusError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the committee by building it.
    pub fn validate(&self) -> Result<()> {
        self.to_committee().map(|_| ())
    }

    /// Builds the committee.
    pub fn to_committee(&self) -> Result<Committee> {
        let members = self
            .members
            .iter()
            .map(|m| {
                BlsPublicKey::from_hex(&m.public_key)
                    .map(|pk| CommitteeMember::new(pk, m.voting_power))
            })
            .collect::<Result<Vec<_>>>()?;
        Committee::new(self.epoch, self.shard_id, self.policy, members)
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        ConsensusError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
    })
}

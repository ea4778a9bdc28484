//! Outbound message construction and broadcast.

use crate::committee::Committee;
use crate::consensus::Consensus;
use crate::crypto::{sign_aggregate, BlsPublicKey, PrivateKeyWrapper};
use crate::error::{ConsensusError, Result};
use crate::message::{FbftMessage, MessageType, SignedMessage};
use crate::state::{ConsensusState, Mode};
use crate::types::{BlockHash, GroupId};
use bytes::Bytes;

/// An encoded message ready for the transport.
#[derive(Debug, Clone)]
pub struct NetworkMessage {
    /// Message type.
    pub msg_type: MessageType,
    /// Keys that signed it.
    pub sender_pubkeys: Vec<BlsPublicKey>,
    /// Encoded envelope.
    pub bytes: Bytes,
}

impl Consensus {
    /// Returns the held keys that belong to `committee`.
    pub(crate) fn keys_in_committee(&self, committee: &Committee) -> Vec<&PrivateKeyWrapper> {
        self.keys
            .iter()
            .filter(|key| committee.is_validator_in_committee(&key.public))
            .collect()
    }

    /// Builds one message signed by all of `keys`.
    ///
    /// PREPARE signs the current block hash and COMMIT signs
    /// `payload_for_sign`; the vote is both payload and envelope signature.
    /// Other types carry `payload_for_sign` as payload and sign the body.
    pub(crate) fn construct(
        &self,
        state: &ConsensusState,
        msg_type: MessageType,
        payload_for_sign: Option<&[u8]>,
        keys: &[&PrivateKeyWrapper],
    ) -> Result<NetworkMessage> {
        let scheme = self.scheme.as_ref();
        let mut message = FbftMessage {
            msg_type,
            shard_id: self.config.shard_id,
            view_id: state.view_id,
            block_num: state.block_num,
            block_hash: state.block_hash,
            sender_pubkeys: keys.iter().map(|k| k.public).collect(),
            payload: Bytes::new(),
            block: Bytes::new(),
        };

        let signature = match msg_type {
            MessageType::Prepare => {
                let vote = sign_aggregate(scheme, keys, state.block_hash.as_bytes())?;
                message.payload = Bytes::copy_from_slice(vote.as_bytes());
                vote
            }
            MessageType::Commit => {
                let commit_payload = payload_for_sign.ok_or_else(|| {
                    ConsensusError::Signing("commit message needs a payload to sign".into())
                })?;
                let vote = sign_aggregate(scheme, keys, commit_payload)?;
                message.payload = Bytes::copy_from_slice(vote.as_bytes());
                vote
            }
            _ => {
                if let Some(payload) = payload_for_sign {
                    message.payload = Bytes::copy_from_slice(payload);
                }
                let digest = BlockHash::digest(&message.encode_body());
                sign_aggregate(scheme, keys, digest.as_bytes())?
            }
        };

        let sender_pubkeys = message.sender_pubkeys.clone();
        Ok(NetworkMessage {
            msg_type,
            sender_pubkeys,
            bytes: SignedMessage::new(message, signature).encode(),
        })
    }

    /// Builds the messages for `keys`: one joint message when aggregate
    /// signing is on, otherwise one per key. Keys that fail to sign are
    /// logged and skipped.
    pub fn construct_p2p_messages(
        &self,
        state: &ConsensusState,
        msg_type: MessageType,
        payload_for_sign: Option<&[u8]>,
        keys: &[&PrivateKeyWrapper],
    ) -> Vec<NetworkMessage> {
        if self.config.aggregate_sig {
            return match self.construct(state, msg_type, payload_for_sign, keys) {
                Ok(msg) => vec![msg],
                Err(e) => {
                    let keys: Vec<_> = keys.iter().map(|k| k.public.to_hex()).collect();
                    tracing::error!(
                        error = %e,
                        msg_type = %msg_type,
                        keys = ?keys,
                        "could not construct message"
                    );
                    Vec::new()
                }
            };
        }

        keys.iter()
            .filter_map(|key| {
                match self.construct(state, msg_type, payload_for_sign, &[*key]) {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            msg_type = %msg_type,
                            key = %key.public,
                            "could not construct message"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Sends `msgs` to the shard group. Observers in listening mode never
    /// send. The first failed send aborts the rest.
    pub async fn broadcast_consensus_p2p_messages(
        &self,
        mode: Mode,
        msgs: &[NetworkMessage],
    ) -> Result<()> {
        if mode == Mode::Listening {
            tracing::debug!(messages = msgs.len(), "listening mode, not sending");
            return Ok(());
        }

        let groups = [GroupId::shard(self.config.shard_id)];
        for msg in msgs {
            self.sender
                .send_without_retry(&groups, msg.bytes.clone())
                .await?;
        }
        Ok(())
    }
}

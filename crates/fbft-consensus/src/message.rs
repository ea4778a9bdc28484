//! FBFT wire messages.
//!
//! A consensus message travels as a signed envelope:
//!
//! ```text
//! version u8 | body | signature [96]
//!
//! body = type u8 | shard u32 | view u64 | block_num u64 | block_hash [32]
//!      | sender_count u16 | sender_count * pubkey [48]
//!      | payload_len u32 | payload | block_len u32 | block
//! ```
//!
//! Integers are big-endian. For PREPARE and COMMIT the envelope signature is
//! the vote itself; every other type is signed over `sha256(body)`.

use crate::crypto::{BlsPublicKey, BlsSignature, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::error::{ConsensusError, Result};
use crate::types::{BlockHash, ShardId};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Envelope format version.
pub const WIRE_VERSION: u8 = 1;

/// Upper bound on sender keys in one message.
pub const MAX_SENDERS: usize = 1024;

/// Consensus message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    /// Leader proposes a block.
    Announce = 1,
    /// Validator vote on the announced block hash.
    Prepare = 2,
    /// Leader's aggregated prepare votes plus the block.
    Prepared = 3,
    /// Validator vote on the commit payload.
    Commit = 4,
    /// Leader's aggregated commit votes.
    Committed = 5,
    /// View change vote.
    ViewChange = 6,
    /// New leader's view change certificate.
    NewView = 7,
}

impl MessageType {
    /// Parse a message type from a byte.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MessageType::Announce),
            2 => Ok(MessageType::Prepare),
            3 => Ok(MessageType::Prepared),
            4 => Ok(MessageType::Commit),
            5 => Ok(MessageType::Committed),
            6 => Ok(MessageType::ViewChange),
            7 => Ok(MessageType::NewView),
            _ => Err(ConsensusError::UnknownMessageType(b)),
        }
    }

    /// Returns true for types only the leader may send.
    pub fn is_leader_message(&self) -> bool {
        matches!(
            self,
            MessageType::Announce | MessageType::Prepared | MessageType::Committed
        )
    }

    /// Returns the message type as a string for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Announce => "announce",
            MessageType::Prepare => "prepare",
            MessageType::Prepared => "prepared",
            MessageType::Commit => "commit",
            MessageType::Committed => "committed",
            MessageType::ViewChange => "view_change",
            MessageType::NewView => "new_view",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded consensus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FbftMessage {
    /// Message type.
    pub msg_type: MessageType,
    /// Shard the message belongs to.
    pub shard_id: ShardId,
    /// View the sender was in.
    pub view_id: u64,
    /// Block number the message is about.
    pub block_num: u64,
    /// Block hash the message is about.
    pub block_hash: BlockHash,
    /// Keys that signed the envelope.
    pub sender_pubkeys: Vec<BlsPublicKey>,
    /// Type-specific payload.
    pub payload: Bytes,
    /// Optional encoded block.
    pub block: Bytes,
}

impl FbftMessage {
    /// Returns true if exactly one key signed the message.
    pub fn has_single_sender(&self) -> bool {
        self.sender_pubkeys.len() == 1
    }

    /// Identity used to deduplicate messages in the log.
    pub fn id(&self) -> BlockHash {
        let mut buf = BytesMut::new();
        self.encode_body_into(&mut buf, false);
        BlockHash::digest(&buf)
    }

    /// Encodes the message body.
    pub fn encode_body(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_body_into(&mut buf, true);
        buf.freeze()
    }

    fn encode_body_into(&self, buf: &mut BytesMut, with_block: bool) {
        buf.put_u8(self.msg_type as u8);
        buf.put_u32(self.shard_id);
        buf.put_u64(self.view_id);
        buf.put_u64(self.block_num);
        buf.put_slice(self.block_hash.as_bytes());

        buf.put_u16(self.sender_pubkeys.len() as u16);
        for key in &self.sender_pubkeys {
            buf.put_slice(key.as_bytes());
        }

        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);

        if with_block {
            buf.put_u32(self.block.len() as u32);
            buf.put_slice(&self.block);
        } else {
            buf.put_u32(0);
        }
    }

    /// Decodes a message body.
    pub fn decode_body(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < 1 + 4 + 8 + 8 + BlockHash::LEN + 2 {
            return Err(ConsensusError::MalformedMessage(
                "truncated message header".into(),
            ));
        }
        let msg_type = MessageType::from_byte(buf.get_u8())?;
        let shard_id = buf.get_u32();
        let view_id = buf.get_u64();
        let block_num = buf.get_u64();
        let mut hash = [0u8; 32];
        buf.copy_to_slice(&mut hash);
        let block_hash = BlockHash::from_bytes(hash);

        let sender_count = buf.get_u16() as usize;
        if sender_count == 0 {
            return Err(ConsensusError::MalformedMessage("no sender keys".into()));
        }
        if sender_count > MAX_SENDERS {
            return Err(ConsensusError::MalformedMessage(format!(
                "too many sender keys: {}",
                sender_count
            )));
        }
        if buf.remaining() < sender_count * PUBLIC_KEY_SIZE {
            return Err(ConsensusError::MalformedMessage(
                "truncated sender keys".into(),
            ));
        }
        let mut sender_pubkeys = Vec::with_capacity(sender_count);
        for _ in 0..sender_count {
            let mut key = [0u8; PUBLIC_KEY_SIZE];
            buf.copy_to_slice(&mut key);
            sender_pubkeys.push(BlsPublicKey::from_bytes(key));
        }

        let payload = read_length_prefixed(&mut buf, "payload")?;
        let block = read_length_prefixed(&mut buf, "block")?;

        if buf.has_remaining() {
            return Err(ConsensusError::MalformedMessage(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }

        Ok(FbftMessage {
            msg_type,
            shard_id,
            view_id,
            block_num,
            block_hash,
            sender_pubkeys,
            payload,
            block,
        })
    }
}

fn read_length_prefixed(buf: &mut &[u8], what: &str) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(ConsensusError::MalformedMessage(format!(
            "truncated {} length",
            what
        )));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ConsensusError::MalformedMessage(format!("truncated {}", what)));
    }
    let data = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(data)
}

/// A message together with its envelope signature.
#[derive(Debug, Clone)]
pub struct SignedMessage {
    /// The decoded message.
    pub message: FbftMessage,
    /// Envelope signature.
    pub signature: BlsSignature,
    body_digest: BlockHash,
}

impl SignedMessage {
    /// Wraps a message with its signature.
    pub fn new(message: FbftMessage, signature: BlsSignature) -> Self {
        let body_digest = BlockHash::digest(&message.encode_body());
        Self {
            message,
            signature,
            body_digest,
        }
    }

    /// SHA-256 of the encoded body, the digest signed by non-vote messages.
    pub fn body_digest(&self) -> &BlockHash {
        &self.body_digest
    }

    /// Encodes the envelope.
    pub fn encode(&self) -> Bytes {
        let body = self.message.encode_body();
        let mut buf = BytesMut::with_capacity(1 + body.len() + SIGNATURE_SIZE);
        buf.put_u8(WIRE_VERSION);
        buf.put_slice(&body);
        buf.put_slice(self.signature.as_bytes());
        buf.freeze()
    }

    /// Decodes an envelope.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 1 + SIGNATURE_SIZE {
            return Err(ConsensusError::MalformedMessage(
                "truncated envelope".into(),
            ));
        }
        if data[0] != WIRE_VERSION {
            return Err(ConsensusError::MalformedMessage(format!(
                "unsupported wire version: {}",
                data[0]
            )));
        }
        let (body, sig) = data[1..].split_at(data.len() - 1 - SIGNATURE_SIZE);
        let message = FbftMessage::decode_body(body)?;
        let signature = BlsSignature::from_slice(sig)?;

        Ok(Self {
            message,
            signature,
            body_digest: BlockHash::digest(body),
        })
    }
}

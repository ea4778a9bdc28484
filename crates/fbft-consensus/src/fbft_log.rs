//! Store of candidate blocks and consensus messages for recent rounds.
//!
//! The log has its own lock, independent of the consensus state lock, so
//! handlers can record and look up messages before taking the state lock.

use crate::block::Block;
use crate::message::{FbftMessage, MessageType};
use crate::types::BlockHash;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Default)]
struct LogInner {
    /// Candidate blocks by hash.
    blocks: HashMap<BlockHash, Arc<Block>>,
    /// Block hashes by number.
    blocks_by_number: BTreeMap<u64, HashSet<BlockHash>>,
    /// Hashes of blocks that passed the external verifier.
    verified: HashSet<BlockHash>,
    /// Messages by block number, in arrival order.
    messages: BTreeMap<u64, Vec<Arc<FbftMessage>>>,
    /// Identities of logged messages.
    message_ids: HashSet<BlockHash>,
    message_count: usize,
}

/// Thread-safe FBFT log.
#[derive(Debug, Default)]
pub struct FbftLog {
    inner: RwLock<LogInner>,
}

impl FbftLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a candidate block. Re-adding the same block is a no-op.
    pub fn add_block(&self, block: Block) {
        let hash = block.hash();
        let number = block.number();
        let mut inner = self.inner.write();
        if inner.blocks.contains_key(&hash) {
            return;
        }
        inner.blocks.insert(hash, Arc::new(block));
        inner.blocks_by_number.entry(number).or_default().insert(hash);
    }

    /// Returns the block with `hash`.
    pub fn get_block_by_hash(&self, hash: &BlockHash) -> Option<Arc<Block>> {
        self.inner.read().blocks.get(hash).cloned()
    }

    /// Returns all candidate blocks at `number`.
    pub fn get_blocks_by_number(&self, number: u64) -> Vec<Arc<Block>> {
        let inner = self.inner.read();
        inner
            .blocks_by_number
            .get(&number)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|h| inner.blocks.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Marks `block` as verified.
    pub fn mark_block_verified(&self, block: &Block) {
        self.inner.write().verified.insert(block.hash());
    }

    /// Returns true if the block with `hash` was verified.
    pub fn is_block_verified(&self, hash: &BlockHash) -> bool {
        self.inner.read().verified.contains(hash)
    }

    /// Records a message. Returns false if an identical message was already
    /// logged.
    pub fn add_message(&self, message: FbftMessage) -> bool {
        let id = message.id();
        let mut inner = self.inner.write();
        if !inner.message_ids.insert(id) {
            return false;
        }
        inner
            .messages
            .entry(message.block_num)
            .or_default()
            .push(Arc::new(message));
        inner.message_count += 1;
        true
    }

    /// Returns messages of `msg_type` for `block_num` and `view_id`.
    pub fn get_messages_by_type_seq_view(
        &self,
        msg_type: MessageType,
        block_num: u64,
        view_id: u64,
    ) -> Vec<Arc<FbftMessage>> {
        self.filter_messages(block_num, |m| {
            m.msg_type == msg_type && m.view_id == view_id
        })
    }

    /// Returns messages of `msg_type` for `block_num`.
    pub fn get_messages_by_type_seq(
        &self,
        msg_type: MessageType,
        block_num: u64,
    ) -> Vec<Arc<FbftMessage>> {
        self.filter_messages(block_num, |m| m.msg_type == msg_type)
    }

    /// Returns messages of `msg_type` for `block_num` and `block_hash`.
    pub fn get_messages_by_type_seq_hash(
        &self,
        msg_type: MessageType,
        block_num: u64,
        block_hash: &BlockHash,
    ) -> Vec<Arc<FbftMessage>> {
        self.filter_messages(block_num, |m| {
            m.msg_type == msg_type && m.block_hash == *block_hash
        })
    }

    /// Finds a COMMITTED message for `block_num` whose block is in the log.
    pub fn get_committed_block_and_msg_from_number(
        &self,
        block_num: u64,
    ) -> Option<(Arc<Block>, Arc<FbftMessage>)> {
        let inner = self.inner.read();
        inner
            .messages
            .get(&block_num)?
            .iter()
            .filter(|m| m.msg_type == MessageType::Committed)
            .find_map(|m| {
                inner
                    .blocks
                    .get(&m.block_hash)
                    .map(|b| (b.clone(), m.clone()))
            })
    }

    /// Drops blocks and messages below `block_num`.
    pub fn prune_before(&self, block_num: u64) {
        let mut inner = self.inner.write();

        let kept_blocks = inner.blocks_by_number.split_off(&block_num);
        let dropped_blocks = std::mem::replace(&mut inner.blocks_by_number, kept_blocks);
        for hash in dropped_blocks.into_values().flatten() {
            inner.blocks.remove(&hash);
            inner.verified.remove(&hash);
        }

        let kept_messages = inner.messages.split_off(&block_num);
        let dropped_messages = std::mem::replace(&mut inner.messages, kept_messages);
        for message in dropped_messages.into_values().flatten() {
            inner.message_ids.remove(&message.id());
            inner.message_count -= 1;
        }
    }

    /// Returns the number of logged blocks.
    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }

    /// Returns the number of logged messages.
    pub fn message_count(&self) -> usize {
        self.inner.read().message_count
    }

    fn filter_messages(
        &self,
        block_num: u64,
        pred: impl Fn(&FbftMessage) -> bool,
    ) -> Vec<Arc<FbftMessage>> {
        self.inner
            .read()
            .messages
            .get(&block_num)
            .map(|msgs| msgs.iter().filter(|m| pred(m)).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{BlsPublicKey, PUBLIC_KEY_SIZE};
    use bytes::Bytes;

    fn block(number: u64, view_id: u64) -> Block {
        Block::new(0, 0, number, view_id, BlockHash::ZERO, 1_000, vec![vec![number as u8]])
    }

    fn message(msg_type: MessageType, block: &Block) -> FbftMessage {
        FbftMessage {
            msg_type,
            shard_id: 0,
            view_id: block.view_id(),
            block_num: block.number(),
            block_hash: block.hash(),
            sender_pubkeys: vec![BlsPublicKey::from_bytes([1u8; PUBLIC_KEY_SIZE])],
            payload: Bytes::from_static(b"sig"),
            block: Bytes::new(),
        }
    }

    #[test]
    fn test_blocks() {
        let log = FbftLog::new();
        let b1 = block(1, 0);
        let b1_alt = block(1, 1);
        log.add_block(b1.clone());
        log.add_block(b1.clone());
        log.add_block(b1_alt.clone());

        assert_eq!(log.block_count(), 2);
        assert_eq!(log.get_block_by_hash(&b1.hash()).unwrap().hash(), b1.hash());
        assert_eq!(log.get_blocks_by_number(1).len(), 2);
        assert!(log.get_blocks_by_number(2).is_empty());

        assert!(!log.is_block_verified(&b1.hash()));
        log.mark_block_verified(&b1);
        assert!(log.is_block_verified(&b1.hash()));
        assert!(!log.is_block_verified(&b1_alt.hash()));
    }

    #[test]
    fn test_messages_deduplicated_and_queried() {
        let log = FbftLog::new();
        let b = block(5, 2);

        assert!(log.add_message(message(MessageType::Announce, &b)));
        assert!(!log.add_message(message(MessageType::Announce, &b)));
        assert!(log.add_message(message(MessageType::Prepared, &b)));
        assert_eq!(log.message_count(), 2);

        assert_eq!(
            log.get_messages_by_type_seq_view(MessageType::Announce, 5, 2).len(),
            1
        );
        assert!(log
            .get_messages_by_type_seq_view(MessageType::Announce, 5, 3)
            .is_empty());
        assert_eq!(log.get_messages_by_type_seq(MessageType::Prepared, 5).len(), 1);
        assert_eq!(
            log.get_messages_by_type_seq_hash(MessageType::Prepared, 5, &b.hash())
                .len(),
            1
        );
        assert!(log
            .get_messages_by_type_seq_hash(MessageType::Prepared, 5, &BlockHash::ZERO)
            .is_empty());
    }

    #[test]
    fn test_committed_block_lookup_requires_block() {
        let log = FbftLog::new();
        let b = block(3, 0);
        log.add_message(message(MessageType::Committed, &b));
        assert!(log.get_committed_block_and_msg_from_number(3).is_none());

        log.add_block(b.clone());
        let (found, msg) = log.get_committed_block_and_msg_from_number(3).unwrap();
        assert_eq!(found.hash(), b.hash());
        assert_eq!(msg.msg_type, MessageType::Committed);
    }

    #[test]
    fn test_prune_before() {
        let log = FbftLog::new();
        for n in 1..=4 {
            let b = block(n, 0);
            log.add_block(b.clone());
            log.mark_block_verified(&b);
            log.add_message(message(MessageType::Committed, &b));
        }

        log.prune_before(3);
        assert_eq!(log.block_count(), 2);
        assert_eq!(log.message_count(), 2);
        assert!(log.get_blocks_by_number(2).is_empty());
        assert!(!log.is_block_verified(&block(2, 0).hash()));
        assert!(log.get_committed_block_and_msg_from_number(3).is_some());

        // A pruned message can be logged again.
        assert!(log.add_message(message(MessageType::Committed, &block(1, 0))));
    }

    #[test]
    fn test_concurrent_appends() {
        let log = Arc::new(FbftLog::new());
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for n in 0..50u64 {
                        let b = block(n, t);
                        log.add_block(b.clone());
                        log.add_message(message(MessageType::Prepared, &b));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(log.block_count(), 400);
        assert_eq!(log.message_count(), 400);
        assert_eq!(log.get_messages_by_type_seq(MessageType::Prepared, 10).len(), 8);
    }
}

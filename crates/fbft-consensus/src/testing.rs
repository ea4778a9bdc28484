//! Test doubles shared by the unit tests.

use crate::block::Block;
use crate::committee::Committee;
use crate::crypto::{
    sign_aggregate, BlsPublicKey, BlsScheme, BlsSecretKey, BlsSignature, PrivateKeyWrapper,
    PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE,
};
use crate::error::{ConsensusError, Result};
use crate::message::{FbftMessage, MessageType, SignedMessage};
use crate::signature::{construct_commit_payload, signature_bitmap_payload};
use crate::traits::{Blockchain, MessageSender};
use crate::types::{BlockHash, GroupId};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Installs a test subscriber once. Filter with `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn expand(seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter = 0u32;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(counter.to_be_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

fn xor_into(acc: &mut [u8], other: &[u8]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a ^= b;
    }
}

/// Insecure stand-in for BLS: signatures are hashes XOR-ed together.
///
/// Aggregation and verification behave like BLS for honest inputs, which is
/// all the state machine tests need.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DigestScheme;

impl DigestScheme {
    fn share(public: &BlsPublicKey, msg: &[u8]) -> Vec<u8> {
        let mut seed = public.as_bytes().to_vec();
        seed.extend_from_slice(msg);
        expand(&seed, SIGNATURE_SIZE)
    }
}

impl BlsScheme for DigestScheme {
    fn public_key(&self, secret: &BlsSecretKey) -> Result<BlsPublicKey> {
        BlsPublicKey::from_slice(&expand(secret.as_bytes(), PUBLIC_KEY_SIZE))
    }

    fn sign(&self, secret: &BlsSecretKey, msg: &[u8]) -> Result<BlsSignature> {
        let public = self.public_key(secret)?;
        BlsSignature::from_slice(&Self::share(&public, msg))
    }

    fn aggregate(&self, signatures: &[BlsSignature]) -> Result<BlsSignature> {
        if signatures.is_empty() {
            return Err(ConsensusError::Signing("nothing to aggregate".into()));
        }
        let mut acc = [0u8; SIGNATURE_SIZE];
        for sig in signatures {
            xor_into(&mut acc, sig.as_bytes());
        }
        Ok(BlsSignature::from_bytes(acc))
    }

    fn verify_aggregate(
        &self,
        public_keys: &[BlsPublicKey],
        msg: &[u8],
        signature: &BlsSignature,
    ) -> bool {
        if public_keys.is_empty() {
            return false;
        }
        let mut acc = [0u8; SIGNATURE_SIZE];
        for key in public_keys {
            xor_into(&mut acc, &Self::share(key, msg));
        }
        &acc == signature.as_bytes()
    }
}

/// Wraps [`DigestScheme`] and refuses to sign with selected keys.
#[derive(Debug, Default)]
pub(crate) struct FailingScheme {
    refuse: HashSet<BlsPublicKey>,
}

impl FailingScheme {
    pub(crate) fn refusing(keys: impl IntoIterator<Item = BlsPublicKey>) -> Self {
        Self {
            refuse: keys.into_iter().collect(),
        }
    }
}

impl BlsScheme for FailingScheme {
    fn public_key(&self, secret: &BlsSecretKey) -> Result<BlsPublicKey> {
        DigestScheme.public_key(secret)
    }

    fn sign(&self, secret: &BlsSecretKey, msg: &[u8]) -> Result<BlsSignature> {
        let public = DigestScheme.public_key(secret)?;
        if self.refuse.contains(&public) {
            return Err(ConsensusError::Signing(format!("refusing key {public}")));
        }
        DigestScheme.sign(secret, msg)
    }

    fn aggregate(&self, signatures: &[BlsSignature]) -> Result<BlsSignature> {
        DigestScheme.aggregate(signatures)
    }

    fn verify_aggregate(
        &self,
        public_keys: &[BlsPublicKey],
        msg: &[u8],
        signature: &BlsSignature,
    ) -> bool {
        DigestScheme.verify_aggregate(public_keys, msg, signature)
    }
}

/// Deterministic key pairs.
pub(crate) fn test_keys(n: usize) -> Vec<PrivateKeyWrapper> {
    (0..n)
        .map(|i| {
            let mut secret = [0u8; SECRET_KEY_SIZE];
            secret[..8].copy_from_slice(&(i as u64 + 1).to_be_bytes());
            PrivateKeyWrapper::new(&DigestScheme, BlsSecretKey::from_bytes(secret))
                .expect("digest scheme derives keys")
        })
        .collect()
}

/// Public halves of [`test_keys`].
pub(crate) fn test_public_keys(n: usize) -> Vec<BlsPublicKey> {
    test_keys(n).into_iter().map(|k| k.public).collect()
}

/// In-memory chain.
#[derive(Debug, Default)]
pub(crate) struct MemoryChain {
    head: Mutex<u64>,
    blocks: Mutex<BTreeMap<u64, Block>>,
    commit_sigs: Mutex<BTreeMap<u64, Bytes>>,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
}

impl MemoryChain {
    /// A chain whose latest block is `head`.
    pub(crate) fn with_head(head: u64) -> Self {
        let chain = Self::default();
        *chain.head.lock() = head;
        chain
    }

    pub(crate) fn commit_sig(&self, block_num: u64) -> Option<Bytes> {
        self.commit_sigs.lock().get(&block_num).cloned()
    }

    pub(crate) fn block(&self, block_num: u64) -> Option<Block> {
        self.blocks.lock().get(&block_num).cloned()
    }

    pub(crate) fn commit_sig_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Stores a commit signature without counting it as a write.
    pub(crate) fn seed_commit_sig(&self, block_num: u64, commit_sig: &[u8]) {
        self.commit_sigs
            .lock()
            .insert(block_num, Bytes::copy_from_slice(commit_sig));
    }

    /// Makes every following commit signature read fail.
    pub(crate) fn set_read_failing(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

impl Blockchain for MemoryChain {
    fn current_block_number(&self) -> u64 {
        *self.head.lock()
    }

    fn read_commit_sig(&self, block_num: u64) -> Result<Option<Bytes>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ConsensusError::Storage("disk unavailable".into()));
        }
        Ok(self.commit_sig(block_num))
    }

    fn write_commit_sig(&self, block_num: u64, commit_sig: &[u8]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.commit_sigs
            .lock()
            .insert(block_num, Bytes::copy_from_slice(commit_sig));
        Ok(())
    }

    fn insert_block(&self, block: &Block, commit_sig: &[u8]) -> Result<()> {
        let mut head = self.head.lock();
        if block.number() != *head + 1 {
            return Err(ConsensusError::Storage(format!(
                "block {} does not extend head {}",
                block.number(),
                *head
            )));
        }
        *head = block.number();
        self.blocks.lock().insert(block.number(), block.clone());
        self.commit_sigs
            .lock()
            .entry(block.number())
            .or_insert_with(|| Bytes::copy_from_slice(commit_sig));
        Ok(())
    }
}

/// Transport that records what it sends.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<(Vec<GroupId>, Bytes)>>,
    fail: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingTransport {
    /// Makes every following send fail.
    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Decoded messages sent so far.
    pub(crate) fn sent(&self) -> Vec<SignedMessage> {
        self.sent
            .lock()
            .iter()
            .map(|(_, bytes)| SignedMessage::decode(bytes).expect("sent messages decode"))
            .collect()
    }

    /// Decoded messages of `msg_type` sent so far.
    pub(crate) fn sent_of(&self, msg_type: MessageType) -> Vec<SignedMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.message.msg_type == msg_type)
            .collect()
    }

    pub(crate) fn groups(&self) -> Vec<Vec<GroupId>> {
        self.sent.lock().iter().map(|(g, _)| g.clone()).collect()
    }
}

#[async_trait]
impl MessageSender for RecordingTransport {
    async fn send_without_retry(&self, groups: &[GroupId], message: Bytes) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConsensusError::Transport("connection refused".into()));
        }
        self.sent.lock().push((groups.to_vec(), message));
        Ok(())
    }
}

/// Builds the messages a leader and its committee would produce.
pub(crate) struct TestLeader {
    pub(crate) keys: Vec<PrivateKeyWrapper>,
    pub(crate) committee: Committee,
    pub(crate) shard_id: u32,
    pub(crate) staking_epoch: u64,
}

impl TestLeader {
    /// Committee of `n` with key 0 leading.
    pub(crate) fn new(n: usize) -> Self {
        let keys = test_keys(n);
        let committee =
            Committee::uniform(0, 0, keys.iter().map(|k| k.public).collect()).expect("committee");
        Self {
            keys,
            committee,
            shard_id: 0,
            staking_epoch: 0,
        }
    }

    pub(crate) fn leader_key(&self) -> BlsPublicKey {
        self.keys[0].public
    }

    /// A block at `number` proposed in `view_id`.
    pub(crate) fn block(&self, number: u64, view_id: u64) -> Block {
        Block::new(
            self.shard_id,
            0,
            number,
            view_id,
            BlockHash::ZERO,
            1_700_000_000_000 + number,
            vec![format!("tx-{number}-{view_id}").into_bytes()],
        )
    }

    fn signed_by_leader(&self, message: FbftMessage) -> Bytes {
        let digest = BlockHash::digest(&message.encode_body());
        let signature = DigestScheme
            .sign(&self.keys[0].secret, digest.as_bytes())
            .expect("sign");
        SignedMessage::new(message, signature).encode()
    }

    fn aggregate_payload(&self, signers: &[usize], msg: &[u8]) -> Bytes {
        let keys: Vec<_> = signers.iter().map(|&i| &self.keys[i]).collect();
        let signature = sign_aggregate(&DigestScheme, &keys, msg).expect("aggregate");
        let mask = self
            .committee
            .mask_for_keys(keys.iter().map(|k| &k.public))
            .expect("mask");
        signature_bitmap_payload(&signature, &mask)
    }

    fn leader_message(
        &self,
        msg_type: MessageType,
        block: &Block,
        payload: Bytes,
        block_bytes: Bytes,
    ) -> FbftMessage {
        FbftMessage {
            msg_type,
            shard_id: self.shard_id,
            view_id: block.view_id(),
            block_num: block.number(),
            block_hash: block.hash(),
            sender_pubkeys: vec![self.leader_key()],
            payload,
            block: block_bytes,
        }
    }

    pub(crate) fn announce(&self, block: &Block) -> Bytes {
        self.signed_by_leader(self.leader_message(
            MessageType::Announce,
            block,
            Bytes::new(),
            Bytes::new(),
        ))
    }

    /// PREPARED with `signers` voting on the block hash.
    pub(crate) fn prepared(&self, block: &Block, signers: &[usize]) -> Bytes {
        let payload = self.aggregate_payload(signers, block.hash().as_bytes());
        let block_bytes = block.encode().expect("encode block");
        self.signed_by_leader(self.leader_message(
            MessageType::Prepared,
            block,
            payload,
            block_bytes,
        ))
    }

    /// COMMITTED with `signers` voting on the commit payload.
    pub(crate) fn committed(&self, block: &Block, signers: &[usize]) -> Bytes {
        let commit_payload = construct_commit_payload(
            self.staking_epoch,
            block.epoch(),
            &block.hash(),
            block.number(),
            block.view_id(),
        );
        let payload = self.aggregate_payload(signers, &commit_payload);
        self.signed_by_leader(self.leader_message(
            MessageType::Committed,
            block,
            payload,
            Bytes::new(),
        ))
    }
}

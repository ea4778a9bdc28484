//! BLS key and signature types, and the seam to the signature scheme.
//!
//! The pairing arithmetic lives outside this crate. Consensus only needs
//! fixed-size encodings and four operations, captured by [`BlsScheme`].

use crate::error::{ConsensusError, Result};

/// Size of a compressed BLS public key.
pub const PUBLIC_KEY_SIZE: usize = 48;

/// Size of a compressed BLS signature.
pub const SIGNATURE_SIZE: usize = 96;

/// Size of a BLS secret key.
pub const SECRET_KEY_SIZE: usize = 32;

/// A serialized BLS public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlsPublicKey([u8; PUBLIC_KEY_SIZE]);

impl BlsPublicKey {
    /// Creates a public key from raw bytes.
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a public key from a byte slice of the right length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            ConsensusError::MalformedMessage(format!(
                "invalid public key length: expected {}, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Parses a hex-encoded public key.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| ConsensusError::InvalidConfig(format!("invalid public key hex: {e}")))?;
        Self::from_slice(&bytes)
            .map_err(|_| ConsensusError::InvalidConfig(format!("invalid public key: {hex_str}")))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlsPublicKey({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for BlsPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A serialized BLS signature, individual or aggregated.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlsSignature([u8; SIGNATURE_SIZE]);

impl BlsSignature {
    /// Creates a signature from raw bytes.
    pub const fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a signature from a byte slice of the right length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SIGNATURE_SIZE] = bytes.try_into().map_err(|_| {
            ConsensusError::InvalidPayload(format!(
                "invalid signature length: expected {}, got {}",
                SIGNATURE_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlsSignature({})", hex::encode(&self.0[..8]))
    }
}

/// A BLS secret key. Never printed.
#[derive(Clone)]
pub struct BlsSecretKey([u8; SECRET_KEY_SIZE]);

impl BlsSecretKey {
    /// Creates a secret key from raw bytes.
    pub const fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for BlsSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BlsSecretKey(<redacted>)")
    }
}

/// A secret key together with its public key.
///
/// A node may hold several of these when it runs more than one committee
/// identity.
#[derive(Debug, Clone)]
pub struct PrivateKeyWrapper {
    /// The secret key.
    pub secret: BlsSecretKey,
    /// The matching public key.
    pub public: BlsPublicKey,
}

impl PrivateKeyWrapper {
    /// Derives the public key with `scheme` and wraps both.
    pub fn new(scheme: &dyn BlsScheme, secret: BlsSecretKey) -> Result<Self> {
        let public = scheme.public_key(&secret)?;
        Ok(Self { secret, public })
    }
}

/// The multi-signature operations consensus relies on.
pub trait BlsScheme: Send + Sync {
    /// Derives the public key of `secret`.
    fn public_key(&self, secret: &BlsSecretKey) -> Result<BlsPublicKey>;

    /// Signs `msg` with `secret`.
    fn sign(&self, secret: &BlsSecretKey, msg: &[u8]) -> Result<BlsSignature>;

    /// Aggregates signatures into one. Fails on an empty input.
    fn aggregate(&self, signatures: &[BlsSignature]) -> Result<BlsSignature>;

    /// Verifies `signature` over `msg` against the aggregate of `public_keys`.
    fn verify_aggregate(
        &self,
        public_keys: &[BlsPublicKey],
        msg: &[u8],
        signature: &BlsSignature,
    ) -> bool;
}

/// Signs `msg` with every key and aggregates the result.
pub fn sign_aggregate(
    scheme: &dyn BlsScheme,
    keys: &[&PrivateKeyWrapper],
    msg: &[u8],
) -> Result<BlsSignature> {
    if keys.is_empty() {
        return Err(ConsensusError::Signing("no keys to sign with".into()));
    }
    let signatures = keys
        .iter()
        .map(|key| scheme.sign(&key.secret, msg))
        .collect::<Result<Vec<_>>>()?;
    scheme.aggregate(&signatures)
}

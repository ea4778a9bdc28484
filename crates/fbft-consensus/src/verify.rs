//! Quorum and aggregate-signature checks.
//!
//! Both checks are pure. A failure rejects the message being processed and
//! nothing else.

use crate::committee::Committee;
use crate::crypto::{BlsScheme, BlsSignature};
use crate::mask::QuorumMask;

/// Returns true if the members enabled in `mask` carry enough voting power.
pub fn verify_quorum(committee: &Committee, mask: &QuorumMask) -> bool {
    committee.is_quorum_achieved_by_mask(mask)
}

/// Verifies `signature` over `digest` against the aggregate public key of the
/// members enabled in `mask`.
pub fn verify_signature(
    scheme: &dyn BlsScheme,
    committee: &Committee,
    signature: &BlsSignature,
    mask: &QuorumMask,
    digest: &[u8],
) -> bool {
    let signers = committee.signers(mask);
    if signers.is_empty() {
        return false;
    }
    scheme.verify_aggregate(&signers, digest, signature)
}

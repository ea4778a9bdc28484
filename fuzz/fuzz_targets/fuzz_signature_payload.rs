//! Fuzz target for `signature || bitmap` payload parsing.

#![no_main]

use arbitrary::Arbitrary;
use fbft_consensus::{read_signature_bitmap_payload, BlsPublicKey, Committee, PUBLIC_KEY_SIZE};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    members: u8,
    offset: u8,
    payload: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let members = usize::from(input.members).max(1);
    let keys = (0..members)
        .map(|i| {
            let mut bytes = [0u8; PUBLIC_KEY_SIZE];
            bytes[..8].copy_from_slice(&(i as u64).to_be_bytes());
            BlsPublicKey::from_bytes(bytes)
        })
        .collect();
    let Ok(committee) = Committee::uniform(0, 0, keys) else {
        return;
    };

    if let Ok(parsed) =
        read_signature_bitmap_payload(&input.payload, usize::from(input.offset), &committee)
    {
        assert!(parsed.mask.count_enabled() <= committee.len());
    }
});

//! Fuzz target for consensus message parsing.
//!
//! The envelope and body decoders must reject arbitrary input without
//! panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(signed) = fbft_consensus::SignedMessage::decode(data) {
        let _ = signed.message.id();
    }

    let _ = fbft_consensus::FbftMessage::decode_body(data);
});

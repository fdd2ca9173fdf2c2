//! Fuzz target for message parsing.
//!
//! Frames come off the wire untrusted; parsing must not panic.

#![no_main]

use habibot::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = std::str::from_utf8(data) {
        let _ = Message::parse(frame);
    }
});

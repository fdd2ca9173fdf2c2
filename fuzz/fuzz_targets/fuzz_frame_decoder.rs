//! Fuzz target for the frame decoder.
//!
//! Arbitrary bytes must never panic, and decoding must be independent of
//! where the stream is split into chunks.

#![no_main]

use habibot::FrameDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut whole = FrameDecoder::new();
    let mut whole_frames = whole.push(data);
    whole_frames.extend(whole.flush());

    let mut split = FrameDecoder::new();
    let mut split_frames = Vec::new();
    for chunk in data.chunks(3) {
        split_frames.extend(split.push(chunk));
    }
    split_frames.extend(split.flush());

    assert_eq!(whole_frames, split_frames);
});

//! Frame decoding for the Elko wire protocol.
//!
//! Elko messages are UTF-8 JSON objects terminated by a blank line (two
//! consecutive newline bytes). Messages arrive split across arbitrary read
//! chunks, so the decoder keeps its framing state between calls.

use tracing::debug;

/// Incremental decoder for double-newline-terminated JSON frames.
///
/// A frame opens at a `{` byte seen outside any frame and closes at the
/// second of two consecutive newlines. Anything else outside a frame that
/// is not itself a newline is noise (telnet negotiation, stray prompts)
/// and gets dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    framed: bool,
    first_eol: bool,
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder in the unframed state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every frame it completes.
    ///
    /// The emitted text runs through the first of the two terminating
    /// newlines; the second is consumed. Decoding is chunk-boundary
    /// independent: any split of the same byte stream yields the same
    /// sequence of frames.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if self.framed {
                if byte == b'\n' {
                    if self.first_eol {
                        frames.push(self.take_frame());
                    } else {
                        self.buf.push(byte);
                        self.first_eol = true;
                    }
                } else {
                    self.first_eol = false;
                    self.buf.push(byte);
                }
            } else if byte == b'{' {
                self.framed = true;
                self.first_eol = false;
                self.buf.push(byte);
            } else if byte != b'\n' {
                debug!("ignoring unframed byte: 0x{byte:02x}");
            }
        }
        frames
    }

    /// Flush a partial frame at end of stream.
    ///
    /// Best-effort recovery: the stream may simply have ended mid-message,
    /// in which case the result will not parse as JSON.
    pub fn flush(&mut self) -> Option<String> {
        if self.framed && !self.buf.is_empty() {
            Some(self.take_frame())
        } else {
            None
        }
    }

    fn take_frame(&mut self) -> String {
        self.framed = false;
        self.first_eol = false;
        String::from_utf8_lossy(&std::mem::take(&mut self.buf)).into_owned()
    }
}

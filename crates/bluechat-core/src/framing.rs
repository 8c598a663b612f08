//! Length-prefixed message framing
//!
//! Stream sockets may split or coalesce writes, so every chat message travels
//! as one frame: a 4-byte big-endian payload length followed by the payload.

use crate::errors::{ChatError, ChatResult};

/// Size of the length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// Default upper bound on a frame payload (64 KiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

/// Encode `payload` as a single frame
pub fn encode_frame(payload: &[u8], max_frame_len: usize) -> ChatResult<Vec<u8>> {
    if payload.len() > max_frame_len {
        return Err(ChatError::FrameTooLarge {
            size: payload.len(),
            max: max_frame_len,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

// ----------------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------------

/// Incremental decoder fed with whatever the socket returns
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    /// Append raw bytes read from the stream
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered
    ///
    /// An oversized length prefix is reported as soon as the header arrives,
    /// before any of the payload is buffered.
    pub fn next_frame(&mut self) -> ChatResult<Option<Vec<u8>>> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&self.buffer[..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_len {
            return Err(ChatError::FrameTooLarge {
                size: len,
                max: self.max_frame_len,
            });
        }

        let end = FRAME_HEADER_LEN + len;
        if self.buffer.len() < end {
            return Ok(None);
        }

        let payload = self.buffer[FRAME_HEADER_LEN..end].to_vec();
        self.buffer.drain(..end);
        Ok(Some(payload))
    }

    /// Bytes buffered but not yet returned as a frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

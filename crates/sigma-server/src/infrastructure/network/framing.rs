//! Frame assembler for one client connection.
//!
//! Bytes arrive from the socket in arbitrary pieces.  The assembler moves
//! through two states:
//!
//! ```text
//! AwaitingHeader ──(14 bytes buffered)──▶ AwaitingPayload { frame_len }
//!       ▲                                          │
//!       └───────(frame_len bytes buffered)─────────┘  yields one request
//! ```
//!
//! Bytes beyond the completed frame stay buffered and seed the next frame,
//! so pipelined requests are handled in order.  When the header cannot be
//! trusted (unknown opcode, impossible length) the frame boundary is lost and
//! everything buffered is discarded.

use sigma_core::protocol::{
    decode_header, decode_request, frame_length, ProtocolError, Request, HEADER_SIZE,
};
use tracing::trace;

/// Where the assembler is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    AwaitingHeader,
    AwaitingPayload { frame_len: usize },
}

/// Accumulating buffer that splits a byte stream into request frames.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    state: AssemblerState,
    max_frame_len: usize,
}

impl FrameAssembler {
    /// Frames longer than `max_frame_len` are rejected without buffering them.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            state: AssemblerState::AwaitingHeader,
            max_frame_len,
        }
    }

    /// Appends bytes read from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Number of bytes waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete frame, decoded, or `None` if more bytes are
    /// needed.  Call repeatedly until it returns `None`.
    ///
    /// A decode error consumes the offending bytes; the assembler stays usable.
    pub fn next_frame(&mut self) -> Option<Result<Request, ProtocolError>> {
        if self.state == AssemblerState::AwaitingHeader {
            if self.buf.len() < HEADER_SIZE {
                return None;
            }
            let header = match decode_header(&self.buf) {
                Ok(header) => header,
                Err(e) => {
                    self.buf.clear();
                    return Some(Err(e));
                }
            };
            let frame_len = frame_length(&header);
            if frame_len < HEADER_SIZE || frame_len > self.max_frame_len {
                self.buf.clear();
                return Some(Err(ProtocolError::MalformedFrame(format!(
                    "frame length {frame_len} outside {HEADER_SIZE}..={}",
                    self.max_frame_len
                ))));
            }
            trace!("{:?} header, frame is {frame_len} bytes", header.opcode);
            self.state = AssemblerState::AwaitingPayload { frame_len };
        }

        let AssemblerState::AwaitingPayload { frame_len } = self.state else {
            return None;
        };
        if self.buf.len() < frame_len {
            return None;
        }

        let frame: Vec<u8> = self.buf.drain(..frame_len).collect();
        self.state = AssemblerState::AwaitingHeader;
        Some(decode_request(&frame))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

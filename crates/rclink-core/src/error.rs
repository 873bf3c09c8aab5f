//! Link error taxonomy.
//!
//! Packet-level failures (`MalformedPacket`, `Reassembly*`) are recoverable:
//! the loop drops the datagram or frame and continues. Session-level
//! (`LinkLost`) failures go to the state machine. `HandshakeFailure` and
//! `Transport` are fatal for the role that hit them.

use std::net::SocketAddr;
use std::time::Duration;

use crate::session::SessionState;
use crate::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// First datagram seen by the host was not the handshake token.
    #[error("Something went wrong: expected handshake token from {from}, got {len} byte(s) {preview:02x?}")]
    HandshakeFailure {
        from: SocketAddr,
        len: usize,
        preview: Vec<u8>,
    },

    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] WireError),

    #[error("frame incomplete: {received}/{expected} fragments")]
    ReassemblyIncomplete { received: usize, expected: usize },

    #[error("frame corrupt: expected {expected_bytes} bytes, got {actual_bytes}")]
    ReassemblyCorrupt {
        expected_bytes: usize,
        actual_bytes: usize,
    },

    #[error("link lost: no activity for {}ms", silent_for.as_millis())]
    LinkLost { silent_for: Duration },

    #[error("invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl LinkError {
    /// Whether the loop that produced this error should drop the offending
    /// packet or frame and carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LinkError::MalformedPacket(_)
                | LinkError::ReassemblyIncomplete { .. }
                | LinkError::ReassemblyCorrupt { .. }
        )
    }

    /// Build a `HandshakeFailure` keeping at most 16 bytes of the payload
    /// for the error message.
    pub fn handshake_failure(from: SocketAddr, payload: &[u8]) -> Self {
        LinkError::HandshakeFailure {
            from,
            len: payload.len(),
            preview: payload.iter().take(16).copied().collect(),
        }
    }
}

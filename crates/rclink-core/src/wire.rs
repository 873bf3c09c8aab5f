//! rclink wire format — every datagram either role puts on the socket.
//!
//! All multi-byte integers and floats are big-endian. The fixed-layout
//! header is `#[repr(C)]` over zerocopy's byte-order types, so it has
//! alignment 1 and no padding; there is no unsafe code in this module.
//!
//! Datagrams are classified per direction. The host only ever receives
//! tokens, acks and control vectors; the controller only ever receives
//! tokens and frame fragments. Tokens are matched before anything else.

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::control::{self, ControlVector};
use crate::fragment::{FrameFragment, FrameTag};

// ── Tokens ───────────────────────────────────────────────────────────────────

/// Handshake request, handshake echo and keepalive.
pub const HELLO: [u8; 4] = *b"hiya";

/// Frame-stream completion acknowledgement.
pub const ACK: [u8; 4] = *b"g2g!";

// ── Sizes ────────────────────────────────────────────────────────────────────

/// Safe datagram ceiling for typical local UDP paths.
pub const DEFAULT_MAX_DATAGRAM: usize = 500;

/// Fragment payload size of the `indexed` stream (258-byte datagrams).
pub const DEFAULT_CHUNK_BYTES: usize = 256;

/// Header length of an `indexed` fragment: a bare `u16` index.
pub const INDEX_PREFIX_LEN: usize = 2;

/// Header length of a `counted` fragment.
pub const COUNTED_HEADER_LEN: usize = std::mem::size_of::<CountedHeader>();

/// Largest fragment count representable on the wire.
pub const MAX_FRAGMENTS: usize = u16::MAX as usize;

// ── Fragment layouts ─────────────────────────────────────────────────────────

/// How a frame fragment is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentLayout {
    /// `index: u16` + payload. The fragment count is not on the wire and
    /// must be derived from the configured frame geometry.
    Indexed,
    /// `frame_id: u16`, `index: u16`, `count: u16` + payload.
    Counted,
}

impl FragmentLayout {
    pub fn header_len(self) -> usize {
        match self {
            FragmentLayout::Indexed => INDEX_PREFIX_LEN,
            FragmentLayout::Counted => COUNTED_HEADER_LEN,
        }
    }
}

impl std::str::FromStr for FragmentLayout {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "indexed" => Ok(FragmentLayout::Indexed),
            "counted" => Ok(FragmentLayout::Counted),
            other => Err(WireError::UnknownLayout(other.to_string())),
        }
    }
}

/// Header of a `counted` fragment datagram.
///
/// Wire size: 6 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct CountedHeader {
    /// Wrapping frame identifier. A newer id supersedes the frame in progress.
    pub frame_id: U16<BigEndian>,
    /// Zero-based position of this fragment in the frame.
    pub index: U16<BigEndian>,
    /// Total fragments in the frame. Never zero on a valid datagram.
    pub count: U16<BigEndian>,
}

assert_eq_size!(CountedHeader, [u8; 6]);

// ── Acks ─────────────────────────────────────────────────────────────────────

/// Encode a frame acknowledgement. `None` yields the bare 4-byte token
/// used with the indexed layout.
pub fn encode_ack(frame_id: Option<u16>) -> Vec<u8> {
    let mut out = ACK.to_vec();
    if let Some(id) = frame_id {
        out.extend_from_slice(&id.to_be_bytes());
    }
    out
}

// ── Inbound classification ───────────────────────────────────────────────────

/// A datagram as seen by the actuator host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostInbound {
    Hello,
    Ack(Option<u16>),
    Control(ControlVector),
}

/// Classify a datagram received by the host.
pub fn classify_host(datagram: &[u8], axis_count: usize) -> Result<HostInbound, WireError> {
    if datagram.is_empty() {
        return Err(WireError::Empty);
    }
    if datagram == HELLO {
        return Ok(HostInbound::Hello);
    }
    if datagram == ACK {
        return Ok(HostInbound::Ack(None));
    }
    if datagram.len() == ACK.len() + 2 && datagram[..ACK.len()] == ACK {
        let id = u16::from_be_bytes([datagram[4], datagram[5]]);
        return Ok(HostInbound::Ack(Some(id)));
    }
    control::decode(datagram, axis_count).map(HostInbound::Control)
}

/// A datagram as seen by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerInbound {
    Hello,
    Fragment(FrameFragment),
}

/// Classify a datagram received by the controller.
pub fn classify_controller(
    datagram: &[u8],
    layout: FragmentLayout,
) -> Result<ControllerInbound, WireError> {
    if datagram.is_empty() {
        return Err(WireError::Empty);
    }
    if datagram == HELLO {
        return Ok(ControllerInbound::Hello);
    }
    decode_fragment(datagram, layout).map(ControllerInbound::Fragment)
}

/// Parse one fragment datagram.
pub fn decode_fragment(datagram: &[u8], layout: FragmentLayout) -> Result<FrameFragment, WireError> {
    let header_len = layout.header_len();
    if datagram.len() <= header_len {
        return Err(WireError::FragmentTooShort {
            len: datagram.len(),
            header: header_len,
        });
    }

    match layout {
        FragmentLayout::Indexed => {
            let index = u16::from_be_bytes([datagram[0], datagram[1]]);
            Ok(FrameFragment {
                index,
                tag: None,
                payload: bytes::Bytes::copy_from_slice(&datagram[INDEX_PREFIX_LEN..]),
            })
        }
        FragmentLayout::Counted => {
            let header = CountedHeader::read_from_prefix(datagram).ok_or(
                WireError::FragmentTooShort {
                    len: datagram.len(),
                    header: header_len,
                },
            )?;
            let index = header.index.get();
            let count = header.count.get();
            if count == 0 {
                return Err(WireError::ZeroFragmentCount);
            }
            if index >= count {
                return Err(WireError::IndexOutOfRange { index, count });
            }
            Ok(FrameFragment {
                index,
                tag: Some(FrameTag {
                    frame_id: header.frame_id.get(),
                    count,
                }),
                payload: bytes::Bytes::copy_from_slice(&datagram[COUNTED_HEADER_LEN..]),
            })
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Reasons a datagram or wire parameter was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("empty datagram")]
    Empty,

    #[error("control datagram is {len} bytes, expected {expected} ({axis_count} axes)")]
    ControlLength {
        len: usize,
        expected: usize,
        axis_count: usize,
    },

    #[error("fragment datagram is {len} bytes, header alone is {header}")]
    FragmentTooShort { len: usize, header: usize },

    #[error("fragment index {index} out of range for count {count}")]
    IndexOutOfRange { index: u16, count: u16 },

    #[error("fragment header declares zero fragments")]
    ZeroFragmentCount,

    #[error("max_chunk_bytes must be at least 1")]
    ZeroChunkSize,

    #[error("payload needs {fragments} fragments, maximum is {}", MAX_FRAGMENTS)]
    PayloadTooLarge { fragments: usize },

    #[error("unknown fragment layout: {0:?}")]
    UnknownLayout(String),
}

// ── Tests ────────────────────────────────────────────────────────────────────

//! Fragmentation and reassembly of oversized payloads.
//!
//! The sender splits a payload into index-tagged chunks small enough for one
//! datagram each. The receiver collects them in any order and rebuilds the
//! payload, reporting a frame as `Incomplete` if fragments are missing and
//! `Corrupt` if the rebuilt length does not match the frame geometry.
//!
//! Two entry points exist on the receive side. [`reassemble`] works on a
//! finished batch of fragments. [`Reassembler`] is fed one datagram at a
//! time by a receive loop and short-circuits a stalled frame to
//! `Incomplete` once no fragment has arrived within the caller's timeout.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::error::LinkError;
use crate::frame::{Frame, FrameGeometry};
use crate::wire::{CountedHeader, FragmentLayout, WireError, MAX_FRAGMENTS};

/// Frame identity carried by `counted` fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTag {
    pub frame_id: u16,
    pub count: u16,
}

/// One piece of a larger payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFragment {
    pub index: u16,
    /// Present on `counted` fragments, absent on `indexed` ones.
    pub tag: Option<FrameTag>,
    pub payload: Bytes,
}

impl FrameFragment {
    /// Attach a frame tag so the fragment encodes in the `counted` layout.
    pub fn tagged(mut self, frame_id: u16, count: u16) -> Self {
        self.tag = Some(FrameTag { frame_id, count });
        self
    }

    pub fn layout(&self) -> FragmentLayout {
        if self.tag.is_some() {
            FragmentLayout::Counted
        } else {
            FragmentLayout::Indexed
        }
    }

    /// Encode as one datagram: header followed by the payload.
    pub fn to_datagram(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.layout().header_len() + self.payload.len());
        match self.tag {
            None => out.extend_from_slice(&self.index.to_be_bytes()),
            Some(tag) => {
                use zerocopy::AsBytes;
                let header = CountedHeader {
                    frame_id: tag.frame_id.into(),
                    index: self.index.into(),
                    count: tag.count.into(),
                };
                out.extend_from_slice(header.as_bytes());
            }
        }
        out.extend_from_slice(&self.payload);
        out.freeze()
    }
}

/// Split `payload` into contiguous chunks of at most `max_chunk_bytes`.
///
/// Indices run from 0 in payload order; the last chunk may be shorter.
/// Chunks share the payload's buffer.
pub fn fragment(payload: &Bytes, max_chunk_bytes: usize) -> Result<Vec<FrameFragment>, WireError> {
    if max_chunk_bytes == 0 {
        return Err(WireError::ZeroChunkSize);
    }
    let fragments = payload.len().div_ceil(max_chunk_bytes);
    if fragments > MAX_FRAGMENTS {
        return Err(WireError::PayloadTooLarge { fragments });
    }

    Ok((0..fragments)
        .map(|i| {
            let start = i * max_chunk_bytes;
            let end = (start + max_chunk_bytes).min(payload.len());
            FrameFragment {
                index: i as u16,
                tag: None,
                payload: payload.slice(start..end),
            }
        })
        .collect())
}

/// Split `payload` and encode every fragment as a datagram in `layout`.
pub fn fragment_datagrams(
    payload: &Bytes,
    max_chunk_bytes: usize,
    layout: FragmentLayout,
    frame_id: u16,
) -> Result<Vec<Bytes>, WireError> {
    let fragments = fragment(payload, max_chunk_bytes)?;
    let count = fragments.len() as u16;
    Ok(fragments
        .into_iter()
        .map(|f| match layout {
            FragmentLayout::Indexed => f.to_datagram(),
            FragmentLayout::Counted => f.tagged(frame_id, count).to_datagram(),
        })
        .collect())
}

// ── Batch reassembly ─────────────────────────────────────────────────────────

/// Outcome of rebuilding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    Complete(Frame),
    Incomplete {
        received: usize,
        expected: usize,
    },
    Corrupt {
        expected_bytes: usize,
        actual_bytes: usize,
    },
}

impl Reassembly {
    pub fn into_result(self) -> Result<Frame, LinkError> {
        match self {
            Reassembly::Complete(frame) => Ok(frame),
            Reassembly::Incomplete { received, expected } => {
                Err(LinkError::ReassemblyIncomplete { received, expected })
            }
            Reassembly::Corrupt {
                expected_bytes,
                actual_bytes,
            } => Err(LinkError::ReassemblyCorrupt {
                expected_bytes,
                actual_bytes,
            }),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Reassembly::Complete(_))
    }
}

/// Rebuild a frame from `expected_count` fragments delivered in any order.
///
/// Duplicate indices keep the first copy. Any index at or past
/// `expected_count` makes the frame `Corrupt`.
pub fn reassemble(
    fragments: impl IntoIterator<Item = FrameFragment>,
    expected_count: usize,
    geometry: FrameGeometry,
) -> Reassembly {
    let mut slots = Slots::new(expected_count);
    let mut stray_bytes = 0usize;
    let mut stray = false;

    for f in fragments {
        let index = f.index as usize;
        let len = f.payload.len();
        if !slots.insert(index, f.payload) && index >= expected_count {
            stray = true;
            stray_bytes += len;
        }
    }

    if stray {
        return Reassembly::Corrupt {
            expected_bytes: geometry.byte_len(),
            actual_bytes: slots.bytes + stray_bytes,
        };
    }
    slots.finish(geometry)
}

/// Index-addressed fragment storage for one frame.
#[derive(Debug)]
struct Slots {
    pieces: Vec<Option<Bytes>>,
    received: usize,
    bytes: usize,
}

impl Slots {
    fn new(expected: usize) -> Self {
        Self {
            pieces: vec![None; expected],
            received: 0,
            bytes: 0,
        }
    }

    fn expected(&self) -> usize {
        self.pieces.len()
    }

    fn is_full(&self) -> bool {
        self.received == self.pieces.len()
    }

    /// Store a piece. Returns false for duplicates and out-of-range indices.
    fn insert(&mut self, index: usize, payload: Bytes) -> bool {
        match self.pieces.get_mut(index) {
            Some(slot) if slot.is_none() => {
                self.bytes += payload.len();
                self.received += 1;
                *slot = Some(payload);
                true
            }
            _ => false,
        }
    }

    fn finish(self, geometry: FrameGeometry) -> Reassembly {
        if !self.is_full() {
            return Reassembly::Incomplete {
                received: self.received,
                expected: self.expected(),
            };
        }
        let expected_bytes = geometry.byte_len();
        if self.bytes != expected_bytes {
            return Reassembly::Corrupt {
                expected_bytes,
                actual_bytes: self.bytes,
            };
        }
        let mut buf = BytesMut::with_capacity(self.bytes);
        for piece in self.pieces.into_iter().flatten() {
            buf.extend_from_slice(&piece);
        }
        match Frame::new(geometry, buf.freeze()) {
            Ok(frame) => Reassembly::Complete(frame),
            Err(pixels) => Reassembly::Corrupt {
                expected_bytes,
                actual_bytes: pixels.len(),
            },
        }
    }
}

// ── Streaming reassembly ─────────────────────────────────────────────────────

/// A frame the [`Reassembler`] has stopped working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    /// `None` in the indexed layout.
    pub frame_id: Option<u16>,
    pub outcome: Reassembly,
}

/// Why a pushed fragment was not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// Belongs to a frame already finished or superseded.
    Stale,
    /// Same index already stored for the frame in progress.
    Duplicate,
    /// Index or declared count disagrees with the frame in progress.
    Mismatch,
}

#[derive(Debug, Default)]
pub struct PushResult {
    pub finished: Vec<Finished>,
    pub rejected: Option<Rejected>,
}

struct Assembly {
    frame_id: Option<u16>,
    slots: Slots,
    last_fragment_at: Instant,
}

/// How long after completing an indexed frame stray fragments are taken as
/// late copies of it. Must stay below the sender's frame period.
pub const INDEXED_GUARD: Duration = Duration::from_millis(5);

/// Receive-side state for a stream of fragmented frames.
///
/// Indexed fragments carry no frame id, so a late copy can only be told
/// apart by timing: within [`INDEXED_GUARD`] of a completion it is dropped
/// as stale. A copy delayed past the guard still opens a new frame.
pub struct Reassembler {
    geometry: FrameGeometry,
    layout: FragmentLayout,
    indexed_count: usize,
    current: Option<Assembly>,
    last_finished: Option<u16>,
    indexed_done_at: Option<Instant>,
}

impl Reassembler {
    /// `max_chunk_bytes` is only used by the indexed layout, where the
    /// fragment count is derived from geometry instead of read off the wire.
    pub fn new(geometry: FrameGeometry, layout: FragmentLayout, max_chunk_bytes: usize) -> Self {
        Self {
            geometry,
            layout,
            indexed_count: geometry.fragment_count(max_chunk_bytes),
            current: None,
            last_finished: None,
            indexed_done_at: None,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// `(received, expected)` for the frame in progress.
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.current
            .as_ref()
            .map(|a| (a.slots.received, a.slots.expected()))
    }

    /// When the frame in progress times out, given the per-fragment timeout.
    pub fn deadline(&self, fragment_timeout: Duration) -> Option<Instant> {
        self.current
            .as_ref()
            .map(|a| a.last_fragment_at + fragment_timeout)
    }

    /// Feed one fragment.
    pub fn push(&mut self, fragment: FrameFragment, now: Instant) -> PushResult {
        let mut result = PushResult::default();

        let (frame_id, expected) = match (self.layout, fragment.tag) {
            (FragmentLayout::Counted, Some(tag)) => (Some(tag.frame_id), tag.count as usize),
            (FragmentLayout::Indexed, None) => (None, self.indexed_count),
            _ => {
                result.rejected = Some(Rejected::Mismatch);
                return result;
            }
        };

        if fragment.index as usize >= expected {
            result.rejected = Some(Rejected::Mismatch);
            return result;
        }

        if let (Some(id), Some(done)) = (frame_id, self.last_finished) {
            if is_stale(id, done) {
                result.rejected = Some(Rejected::Stale);
                return result;
            }
        }
        if let (None, None, Some(done_at)) = (frame_id, &self.current, self.indexed_done_at) {
            if now.saturating_duration_since(done_at) < INDEXED_GUARD {
                result.rejected = Some(Rejected::Stale);
                return result;
            }
        }

        let current_id = self.current.as_ref().and_then(|a| a.frame_id);
        if let (Some(id), Some(cur)) = (frame_id, current_id) {
            if id != cur {
                if is_stale(id, cur) {
                    result.rejected = Some(Rejected::Stale);
                    return result;
                }
                if let Some(old) = self.abandon() {
                    result.finished.push(old);
                }
            }
        }

        let assembly = self.current.get_or_insert_with(|| Assembly {
            frame_id,
            slots: Slots::new(expected),
            last_fragment_at: now,
        });

        if assembly.slots.expected() != expected {
            result.rejected = Some(Rejected::Mismatch);
            return result;
        }
        if !assembly.slots.insert(fragment.index as usize, fragment.payload) {
            result.rejected = Some(Rejected::Duplicate);
            return result;
        }
        assembly.last_fragment_at = now;

        if assembly.slots.is_full() {
            if let Some(done) = self.current.take() {
                self.last_finished = done.frame_id;
                if done.frame_id.is_none() {
                    self.indexed_done_at = Some(now);
                }
                result.finished.push(Finished {
                    frame_id: done.frame_id,
                    outcome: done.slots.finish(self.geometry),
                });
            }
        }
        result
    }

    /// Give up on the frame in progress if it has been silent for
    /// `fragment_timeout`.
    pub fn expire(&mut self, now: Instant, fragment_timeout: Duration) -> Option<Finished> {
        let stalled = self
            .current
            .as_ref()
            .is_some_and(|a| now.saturating_duration_since(a.last_fragment_at) >= fragment_timeout);
        if stalled {
            self.abandon()
        } else {
            None
        }
    }

    /// Drop the frame in progress, reporting it as `Incomplete`.
    pub fn abandon(&mut self) -> Option<Finished> {
        let a = self.current.take()?;
        if a.frame_id.is_some() {
            self.last_finished = a.frame_id;
        }
        Some(Finished {
            frame_id: a.frame_id,
            outcome: Reassembly::Incomplete {
                received: a.slots.received,
                expected: a.slots.expected(),
            },
        })
    }

    /// Forget all frame history, e.g. after the peer re-handshakes.
    pub fn reset(&mut self) {
        self.current = None;
        self.last_finished = None;
        self.indexed_done_at = None;
    }
}

/// How far behind the newest frame id a fragment may be and still count
/// as a late copy. Anything further back is taken as a restarted sender.
pub const STALE_WINDOW: u16 = 64;

/// Whether `candidate` is `reference` or a recent predecessor of it,
/// comparing 16-bit ids with wraparound.
pub fn is_stale(candidate: u16, reference: u16) -> bool {
    reference.wrapping_sub(candidate) < STALE_WINDOW
}

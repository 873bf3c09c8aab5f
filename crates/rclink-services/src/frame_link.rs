//! Frame stream endpoints: the host-side sender gated by the ack window and
//! the controller-side receiver that reassembles and produces acks.

use std::time::Instant;

use bytes::Bytes;

use rclink_core::config::FrameConfig;
use rclink_core::fragment::{fragment_datagrams, Finished, Reassembly};
use rclink_core::wire::{encode_ack, FragmentLayout, WireError};
use rclink_core::{AckWindow, Frame, FrameFragment, Reassembler};

/// Host side. Hands out frame ids and fragment datagrams while the ack
/// window has room.
#[derive(Debug)]
pub struct FrameSender {
    layout: FragmentLayout,
    max_chunk_bytes: usize,
    window: AckWindow,
    next_id: u16,
    sent: u64,
    abandoned: u64,
}

impl FrameSender {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            layout: config.layout,
            max_chunk_bytes: config.max_chunk_bytes,
            window: AckWindow::new(config.window, config.ack_timeout()),
            next_id: 0,
            sent: 0,
            abandoned: 0,
        }
    }

    pub fn on_ack(&mut self, frame_id: Option<u16>) {
        let retired = self.window.ack(frame_id);
        tracing::trace!(?frame_id, retired, "frame ack");
    }

    /// Expire overdue frames, then report whether another may go out.
    pub fn ready(&mut self, now: Instant) -> bool {
        let expired = self.window.expire(now);
        if !expired.is_empty() {
            self.abandoned += expired.len() as u64;
            tracing::debug!(?expired, "frames abandoned without ack");
        }
        self.window.has_room()
    }

    /// Fragment `frame` and record it as in flight. Returns its id and the
    /// datagrams to send in order.
    pub fn prepare(&mut self, frame: &Frame, now: Instant) -> Result<(u16, Vec<Bytes>), WireError> {
        let frame_id = self.next_id;
        let datagrams =
            fragment_datagrams(frame.pixels(), self.max_chunk_bytes, self.layout, frame_id)?;
        self.window.sent(frame_id, now);
        self.next_id = self.next_id.wrapping_add(1);
        self.sent += 1;
        Ok((frame_id, datagrams))
    }

    /// Forget frames in flight, e.g. once the peer is gone.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn in_flight(&self) -> usize {
        self.window.in_flight()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned
    }
}

/// A reassembled frame and the ack datagram owed to the sender.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub frame: Frame,
    pub ack: Vec<u8>,
}

/// Controller side.
pub struct FrameReceiver {
    reassembler: Reassembler,
    fragment_timeout: std::time::Duration,
    completed: u64,
    dropped: u64,
}

impl FrameReceiver {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            reassembler: Reassembler::new(config.geometry(), config.layout, config.max_chunk_bytes),
            fragment_timeout: config.fragment_timeout(),
            completed: 0,
            dropped: 0,
        }
    }

    pub fn push(&mut self, fragment: FrameFragment, now: Instant) -> Vec<Delivery> {
        let result = self.reassembler.push(fragment, now);
        if let Some(reason) = result.rejected {
            tracing::trace!(?reason, "fragment not used");
        }
        result
            .finished
            .into_iter()
            .filter_map(|f| self.settle(f))
            .collect()
    }

    /// Drop a stalled frame. Call before computing the next receive timeout.
    pub fn expire(&mut self, now: Instant) {
        if let Some(finished) = self.reassembler.expire(now, self.fragment_timeout) {
            self.settle(finished);
        }
    }

    /// When the frame in progress will time out.
    pub fn deadline(&self) -> Option<Instant> {
        self.reassembler.deadline(self.fragment_timeout)
    }

    pub fn reset(&mut self) {
        self.reassembler.reset();
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn settle(&mut self, finished: Finished) -> Option<Delivery> {
        let frame_id = finished.frame_id;
        match finished.outcome {
            Reassembly::Complete(frame) => {
                self.completed += 1;
                tracing::trace!(?frame_id, "frame reassembled");
                Some(Delivery {
                    frame,
                    ack: encode_ack(frame_id),
                })
            }
            outcome @ Reassembly::Incomplete { .. } => {
                self.dropped += 1;
                if let Err(e) = outcome.into_result() {
                    tracing::debug!(?frame_id, error = %e, "frame dropped");
                }
                None
            }
            outcome @ Reassembly::Corrupt { .. } => {
                self.dropped += 1;
                if let Err(e) = outcome.into_result() {
                    tracing::warn!(?frame_id, error = %e, "frame dropped");
                }
                None
            }
        }
    }
}

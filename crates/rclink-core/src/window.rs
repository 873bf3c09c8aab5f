//! Frame acknowledgement window on the sending side.
//!
//! At most `capacity` frames may be awaiting a `g2g!` at once; capacity 1
//! is strict lockstep. An ack retires the named frame and everything sent
//! before it. Frames that stay unacknowledged past the ack timeout are
//! abandoned so a dropped ack cannot stall the stream.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    frame_id: u16,
    sent_at: Instant,
}

#[derive(Debug)]
pub struct AckWindow {
    capacity: usize,
    ack_timeout: Duration,
    in_flight: VecDeque<InFlight>,
}

impl AckWindow {
    pub fn new(capacity: usize, ack_timeout: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ack_timeout,
            in_flight: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn has_room(&self) -> bool {
        self.in_flight.len() < self.capacity
    }

    /// Record that `frame_id` has been sent.
    pub fn sent(&mut self, frame_id: u16, now: Instant) {
        self.in_flight.push_back(InFlight {
            frame_id,
            sent_at: now,
        });
    }

    /// Apply an acknowledgement. A bare ack (`None`) retires the oldest
    /// frame. Returns how many frames were retired; an id that is not in
    /// flight retires nothing.
    pub fn ack(&mut self, frame_id: Option<u16>) -> usize {
        match frame_id {
            None => self.in_flight.pop_front().map_or(0, |_| 1),
            Some(id) => match self.in_flight.iter().position(|f| f.frame_id == id) {
                Some(pos) => self.in_flight.drain(..=pos).count(),
                None => 0,
            },
        }
    }

    /// Abandon frames older than the ack timeout. Returns their ids.
    pub fn expire(&mut self, now: Instant) -> Vec<u16> {
        let mut expired = Vec::new();
        while let Some(front) = self.in_flight.front() {
            if now.saturating_duration_since(front.sent_at) < self.ack_timeout {
                break;
            }
            expired.push(front.frame_id);
            self.in_flight.pop_front();
        }
        expired
    }

    /// When the oldest frame in flight will be abandoned.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.front().map(|f| f.sent_at + self.ack_timeout)
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

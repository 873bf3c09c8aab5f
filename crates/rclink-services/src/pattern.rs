//! Frame sources for the host's return stream.

use rclink_core::{Frame, FrameGeometry};

pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Frame;
}

/// Black/white checkerboard whose phase inverts every `flip_every` frames.
#[derive(Debug)]
pub struct TestPattern {
    geometry: FrameGeometry,
    square: u32,
    flip_every: u32,
    produced: u64,
}

impl TestPattern {
    pub const SQUARE_PX: u32 = 40;

    /// Inverts once per second at `rate_hz`.
    pub fn new(geometry: FrameGeometry, rate_hz: u32) -> Self {
        Self {
            geometry,
            square: Self::SQUARE_PX,
            flip_every: rate_hz.max(1),
            produced: 0,
        }
    }

    fn inverted(&self) -> bool {
        (self.produced / u64::from(self.flip_every)) % 2 == 1
    }
}

impl FrameSource for TestPattern {
    fn next_frame(&mut self) -> Frame {
        let inverted = self.inverted();
        let square = self.square;
        let frame = Frame::from_fn(self.geometry, |x, y, _| {
            let white = ((x / square + y / square) % 2 == 0) != inverted;
            if white {
                u8::MAX
            } else {
                0
            }
        });
        self.produced += 1;
        frame
    }
}

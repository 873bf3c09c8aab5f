//! Frame geometry and the reassembled pixel buffer.
//!
//! Pixels are 8 bits per channel. A frame is valid only when its byte
//! length equals `width * height * channels` exactly.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl FrameGeometry {
    pub const fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Exact byte length of one frame.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// Fragments needed to carry one frame at `max_chunk_bytes` per fragment.
    pub fn fragment_count(&self, max_chunk_bytes: usize) -> usize {
        if max_chunk_bytes == 0 {
            return 0;
        }
        self.byte_len().div_ceil(max_chunk_bytes)
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self::new(640, 480, 3)
    }
}

/// A complete frame. Construct through [`Frame::new`] so the length
/// invariant always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    geometry: FrameGeometry,
    pixels: Bytes,
}

impl Frame {
    /// Wrap `pixels`, or hand them back if the length does not match.
    pub fn new(geometry: FrameGeometry, pixels: Bytes) -> Result<Self, Bytes> {
        if pixels.len() == geometry.byte_len() {
            Ok(Self { geometry, pixels })
        } else {
            Err(pixels)
        }
    }

    /// Build a frame by evaluating `channel(x, y, c)` for every byte in
    /// row-major, channel-interleaved order.
    pub fn from_fn(geometry: FrameGeometry, mut channel: impl FnMut(u32, u32, u32) -> u8) -> Self {
        let mut pixels = Vec::with_capacity(geometry.byte_len());
        for y in 0..geometry.height {
            for x in 0..geometry.width {
                for c in 0..geometry.channels {
                    pixels.push(channel(x, y, c));
                }
            }
        }
        Self {
            geometry,
            pixels: Bytes::from(pixels),
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    pub fn into_pixels(self) -> Bytes {
        self.pixels
    }

    /// Channel values of the pixel at column `x`, row `y` (row-major).
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.geometry.width || y >= self.geometry.height {
            return None;
        }
        let channels = self.geometry.channels as usize;
        let start = (y as usize * self.geometry.width as usize + x as usize) * channels;
        self.pixels.get(start..start + channels)
    }
}

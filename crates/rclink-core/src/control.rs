//! Control-vector codec.
//!
//! A control vector is N big-endian `f32` axes. Axis 0 is lateral
//! (steering), axis 1 is longitudinal (throttle). The codec neither clamps
//! nor applies the deadzone; that is the sampler's job.

use crate::wire::WireError;

/// Bytes per encoded axis.
pub const AXIS_BYTES: usize = 4;

/// Axis count of the steering/throttle vehicle link.
pub const DEFAULT_AXIS_COUNT: usize = 2;

pub const LATERAL: usize = 0;
pub const LONGITUDINAL: usize = 1;

/// One sampled set of axis values. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlVector {
    axes: Vec<f32>,
}

impl ControlVector {
    pub fn new(axes: Vec<f32>) -> Self {
        Self { axes }
    }

    /// Two-axis vector in the fixed steering/throttle order.
    pub fn steering_throttle(lateral: f32, longitudinal: f32) -> Self {
        Self {
            axes: vec![lateral, longitudinal],
        }
    }

    /// All axes at rest.
    pub fn neutral(axis_count: usize) -> Self {
        Self {
            axes: vec![0.0; axis_count],
        }
    }

    pub fn axes(&self) -> &[f32] {
        &self.axes
    }

    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    /// Axis 0, or 0.0 for an empty vector.
    pub fn lateral(&self) -> f32 {
        self.axes.get(LATERAL).copied().unwrap_or(0.0)
    }

    /// Axis 1, or 0.0 for a vector with fewer than two axes.
    pub fn longitudinal(&self) -> f32 {
        self.axes.get(LONGITUDINAL).copied().unwrap_or(0.0)
    }

    /// Copy with every axis forced to 0.0 inside the deadzone.
    pub fn with_deadzone(&self, threshold: f32) -> Self {
        Self {
            axes: self
                .axes
                .iter()
                .map(|&v| apply_deadzone(v, threshold))
                .collect(),
        }
    }

    /// Copy with every axis clamped into [-1.0, 1.0]. Non-finite values
    /// become 0.0.
    pub fn clamped(&self) -> Self {
        Self {
            axes: self
                .axes
                .iter()
                .map(|&v| clamp_axis(v))
                .collect(),
        }
    }
}

/// Clamp one axis into [-1.0, 1.0]; NaN and infinities become 0.0.
pub fn clamp_axis(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Force near-zero readings to exactly 0.0.
pub fn apply_deadzone(value: f32, threshold: f32) -> f32 {
    if value.abs() < threshold {
        0.0
    } else {
        value
    }
}

/// Encode a vector as big-endian `f32`s in axis order.
pub fn encode(vector: &ControlVector) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.axes.len() * AXIS_BYTES);
    for axis in &vector.axes {
        out.extend_from_slice(&axis.to_be_bytes());
    }
    out
}

/// Decode exactly `axis_count` big-endian `f32`s.
pub fn decode(bytes: &[u8], axis_count: usize) -> Result<ControlVector, WireError> {
    let expected = axis_count * AXIS_BYTES;
    if bytes.len() != expected || axis_count == 0 {
        return Err(WireError::ControlLength {
            len: bytes.len(),
            expected,
            axis_count,
        });
    }
    let axes = bytes
        .chunks_exact(AXIS_BYTES)
        .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(ControlVector { axes })
}

//! Mapping control vectors onto the steering servo and throttle ESC.

use rclink_core::config::ActuatorConfig;
use rclink_core::control::clamp_axis;
use rclink_core::ControlVector;

/// Pulse-width bounds of the two PWM channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmMapping {
    pub min_steering: u16,
    pub max_steering: u16,
    pub min_throttle: u16,
    pub max_throttle: u16,
    pub frequency_hz: u16,
}

impl From<&ActuatorConfig> for PwmMapping {
    fn from(c: &ActuatorConfig) -> Self {
        Self {
            min_steering: c.min_steering,
            max_steering: c.max_steering,
            min_throttle: c.min_throttle,
            max_throttle: c.max_throttle,
            frequency_hz: c.frequency_hz,
        }
    }
}

impl Default for PwmMapping {
    fn default() -> Self {
        Self::from(&ActuatorConfig::default())
    }
}

/// Pulse widths to apply on the next actuator update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmCommand {
    pub steering: u16,
    pub throttle: u16,
}

impl PwmMapping {
    /// +1.0 is full right (`min_steering`), -1.0 full left (`max_steering`).
    pub fn steering(&self, value: f32) -> u16 {
        scale(self.min_steering, self.max_steering, 1.0 - clamp_axis(value))
    }

    /// -1.0 is full reverse (`min_throttle`), +1.0 full forward.
    pub fn throttle(&self, value: f32) -> u16 {
        scale(self.min_throttle, self.max_throttle, 1.0 + clamp_axis(value))
    }

    pub fn command(&self, vector: &ControlVector) -> PwmCommand {
        let vector = vector.clamped();
        PwmCommand {
            steering: self.steering(vector.lateral()),
            throttle: self.throttle(vector.longitudinal()),
        }
    }

    /// Straight ahead, zero throttle.
    pub fn neutral(&self) -> PwmCommand {
        PwmCommand {
            steering: self.steering(0.0),
            throttle: self.throttle(0.0),
        }
    }
}

/// `min + t * 0.5 * (max - min)` for `t` in [0, 2].
fn scale(min: u16, max: u16, t: f32) -> u16 {
    let span = f32::from(max) - f32::from(min);
    (f32::from(min) + t * 0.5 * span).round() as u16
}

/// Drives the physical outputs. Implementations talk to the PWM driver.
pub trait Actuator: Send {
    fn apply(&mut self, command: PwmCommand) -> anyhow::Result<()>;
}

/// Actuator that only logs what it would drive.
#[derive(Debug, Default)]
pub struct LogActuator {
    last: Option<PwmCommand>,
    applied: u64,
}

impl LogActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<PwmCommand> {
        self.last
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }
}

impl Actuator for LogActuator {
    fn apply(&mut self, command: PwmCommand) -> anyhow::Result<()> {
        if self.last != Some(command) {
            tracing::info!(
                steering = command.steering,
                throttle = command.throttle,
                "actuator command"
            );
        } else {
            tracing::trace!(steering = command.steering, throttle = command.throttle, "actuator hold");
        }
        self.last = Some(command);
        self.applied += 1;
        Ok(())
    }
}

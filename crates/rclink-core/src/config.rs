//! Configuration system for rclink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RCLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/rclink/config.toml
//!   3. ~/.config/rclink/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::FrameGeometry;
use crate::session::LostPolicy;
use crate::wire::{FragmentLayout, DEFAULT_CHUNK_BYTES, DEFAULT_MAX_DATAGRAM, MAX_FRAGMENTS};

/// Top-level configuration. Both roles read the same file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub network: NetworkConfig,
    pub control: ControlConfig,
    pub frame: FrameConfig,
    pub session: SessionConfig,
    pub actuator: ActuatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Largest datagram either role will send, header included.
    pub max_datagram: usize,
    /// SO_RCVBUF requested for the socket. 0 = leave the OS default.
    pub recv_buffer_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control loop frequency on both sides.
    pub rate_hz: u32,
    /// Readings with a smaller magnitude are sent as exactly 0.0.
    pub deadzone: f32,
    /// Axes per control datagram. 2 = steering, throttle.
    pub axis_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Stream frames from the host back to the controller.
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Fragment payload bytes, not counting the header.
    pub max_chunk_bytes: usize,
    pub layout: FragmentLayout,
    /// Frames per second offered by the host.
    pub rate_hz: u32,
    /// Unacknowledged frames the host may have outstanding. 1 = lockstep.
    pub window: usize,
    /// A frame in progress with no new fragment for this long is dropped.
    pub fragment_timeout_ms: u64,
    /// A sent frame with no ack for this long is abandoned.
    pub ack_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Controller: wait this long for the handshake echo per attempt.
    pub handshake_timeout_ms: u64,
    /// Controller: attempts before giving up.
    pub handshake_retries: u32,
    /// Controller: backoff before the second attempt, doubled per attempt.
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Host: limit on the first wait for a controller. 0 = wait forever.
    pub accept_timeout_ms: u64,
    /// Controller: keepalive `hiya` interval.
    pub keepalive_ms: u64,
    /// Silence after which a connected peer is considered lost.
    pub liveness_ms: u64,
    pub on_lost: LostPolicy,
}

/// PWM bounds of the steering servo and the throttle ESC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Full right.
    pub min_steering: u16,
    /// Full left.
    pub max_steering: u16,
    /// Full reverse.
    pub min_throttle: u16,
    /// Full forward.
    pub max_throttle: u16,
    pub frequency_hz: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_datagram: DEFAULT_MAX_DATAGRAM,
            recv_buffer_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30,
            deadzone: 0.15,
            axis_count: crate::control::DEFAULT_AXIS_COUNT,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        let geometry = FrameGeometry::default();
        Self {
            enabled: false,
            width: geometry.width,
            height: geometry.height,
            channels: geometry.channels,
            max_chunk_bytes: DEFAULT_CHUNK_BYTES,
            layout: FragmentLayout::Counted,
            rate_hz: 30,
            window: 1,
            fragment_timeout_ms: 100,
            ack_timeout_ms: 500,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 500,
            handshake_retries: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 2_000,
            accept_timeout_ms: 0,
            keepalive_ms: 250,
            liveness_ms: 1_000,
            on_lost: LostPolicy::Rehandshake,
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            min_steering: 300,
            max_steering: 460,
            min_throttle: 320,
            max_throttle: 420,
            frequency_hz: 60,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl FrameConfig {
    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width, self.height, self.channels)
    }

    pub fn fragment_count(&self) -> usize {
        self.geometry().fragment_count(self.max_chunk_bytes)
    }

    /// Full datagram size of one fragment.
    pub fn datagram_len(&self) -> usize {
        self.layout.header_len() + self.max_chunk_bytes
    }

    pub fn fragment_timeout(&self) -> Duration {
        Duration::from_millis(self.fragment_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn liveness(&self) -> Duration {
        Duration::from_millis(self.liveness_ms)
    }

    pub fn accept_timeout(&self) -> Option<Duration> {
        (self.accept_timeout_ms > 0).then(|| Duration::from_millis(self.accept_timeout_ms))
    }

    /// Delay before handshake attempt `attempt` (0-based). The first
    /// attempt goes out immediately.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let ms = self.backoff_base_ms.saturating_mul(factor).min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("rclink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LinkConfig {
    /// Load config: env vars → file → defaults, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read `path` if it exists, defaults otherwise. No env overrides, no
    /// validation.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(LinkConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RCLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    pub fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&LinkConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply RCLINK_* env var overrides. Unparsable values are ignored.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("RCLINK_CONTROL__RATE_HZ") {
            self.control.rate_hz = v;
        }
        if let Some(v) = env_parse("RCLINK_CONTROL__DEADZONE") {
            self.control.deadzone = v;
        }
        if let Ok(v) = std::env::var("RCLINK_FRAME__ENABLED") {
            self.frame.enabled = v == "true" || v == "1";
        }
        if let Some(v) = env_parse("RCLINK_FRAME__LAYOUT") {
            self.frame.layout = v;
        }
        if let Some(v) = env_parse("RCLINK_SESSION__ON_LOST") {
            self.session.on_lost = v;
        }
        if let Some(v) = env_parse("RCLINK_NETWORK__MAX_DATAGRAM") {
            self.network.max_datagram = v;
        }
    }

    /// Reject settings the link cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.control.rate_hz == 0 {
            return invalid("control.rate_hz must be positive".into());
        }
        if !(0.0..1.0).contains(&self.control.deadzone) {
            return invalid(format!(
                "control.deadzone must be in [0, 1), got {}",
                self.control.deadzone
            ));
        }
        if self.control.axis_count == 0 {
            return invalid("control.axis_count must be at least 1".into());
        }

        let frame = &self.frame;
        if frame.width == 0 || frame.height == 0 || frame.channels == 0 {
            return invalid(format!(
                "frame geometry {}x{}x{} has a zero dimension",
                frame.width, frame.height, frame.channels
            ));
        }
        if frame.max_chunk_bytes == 0 {
            return invalid("frame.max_chunk_bytes must be at least 1".into());
        }
        if frame.datagram_len() > self.network.max_datagram {
            return invalid(format!(
                "fragment datagram of {} bytes ({} header + {} chunk) exceeds network.max_datagram {}",
                frame.datagram_len(),
                frame.layout.header_len(),
                frame.max_chunk_bytes,
                self.network.max_datagram
            ));
        }
        if frame.fragment_count() > MAX_FRAGMENTS {
            return invalid(format!(
                "frame needs {} fragments, maximum is {}",
                frame.fragment_count(),
                MAX_FRAGMENTS
            ));
        }
        if frame.rate_hz == 0 {
            return invalid("frame.rate_hz must be positive".into());
        }
        if frame.window == 0 {
            return invalid("frame.window must be at least 1".into());
        }

        let act = &self.actuator;
        if act.min_steering >= act.max_steering || act.min_throttle >= act.max_throttle {
            return invalid("actuator PWM minimum must be below maximum".into());
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

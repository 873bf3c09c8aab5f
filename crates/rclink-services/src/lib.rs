//! rclink-services — the tokio side of rclink: sockets, pacing, handshake,
//! and the per-role link loops built on rclink-core.

pub mod actuator;
pub mod controller;
pub mod frame_link;
pub mod handshake;
pub mod host;
pub mod input;
pub mod pacer;
pub mod pattern;
pub mod transport;

pub use actuator::{Actuator, LogActuator, PwmCommand, PwmMapping};
pub use controller::ControllerLink;
pub use frame_link::{FrameReceiver, FrameSender};
pub use host::HostLink;
pub use input::{AnalogInput, DigitalInput, InputKind, InputLine, InputSource, LatestLine};
pub use pacer::Pacer;
pub use pattern::{FrameSource, TestPattern};

//! rclink-core — shared types, wire format, and link state for rclink.
//! Both roles and the services crate depend on this one. Nothing here
//! touches a socket or a clock; callers pass `Instant`s in.

pub mod config;
pub mod control;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod session;
pub mod window;
pub mod wire;

pub use config::LinkConfig;
pub use control::ControlVector;
pub use error::LinkError;
pub use fragment::{FrameFragment, Reassembler, Reassembly};
pub use frame::{Frame, FrameGeometry};
pub use session::{LostPolicy, Session, SessionState};
pub use window::AckWindow;
pub use wire::{FragmentLayout, WireError};

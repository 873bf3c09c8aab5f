//! Per-peer session state machine.
//!
//! ```text
//! Disconnected ──begin_handshake──▶ Handshaking ──connect──▶ Connected
//!                                        ▲                      │
//!                                        └──begin_handshake── Lost ◀── check_liveness (silent ≥ window)
//! ```
//!
//! A session is owned by exactly one task of the role that created it.
//! Other tasks see its state through a watch channel, never the session.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Handshaking,
    Connected,
    Lost,
}

/// What a role does once its session is `Lost`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LostPolicy {
    Rehandshake,
    Terminate,
}

impl std::str::FromStr for LostPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rehandshake" => Ok(LostPolicy::Rehandshake),
            "terminate" => Ok(LostPolicy::Terminate),
            other => Err(format!("unknown lost policy: {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    local: SocketAddr,
    remote: Option<SocketAddr>,
    state: SessionState,
    last_activity: Instant,
    connected_at: Option<Instant>,
    handshakes: u32,
}

impl Session {
    /// A session whose remote is learned from the handshake (host side).
    pub fn new(local: SocketAddr, now: Instant) -> Self {
        Self {
            local,
            remote: None,
            state: SessionState::Disconnected,
            last_activity: now,
            connected_at: None,
            handshakes: 0,
        }
    }

    /// A session towards a known remote (controller side).
    pub fn with_remote(local: SocketAddr, remote: SocketAddr, now: Instant) -> Self {
        Self {
            remote: Some(remote),
            ..Self::new(local, now)
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn connected_at(&self) -> Option<Instant> {
        self.connected_at
    }

    /// Completed handshakes, including re-handshakes.
    pub fn handshakes(&self) -> u32 {
        self.handshakes
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn is_peer(&self, addr: SocketAddr) -> bool {
        self.remote == Some(addr)
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Disconnected | Lost → Handshaking.
    pub fn begin_handshake(&mut self, now: Instant) -> Result<(), LinkError> {
        match self.state {
            SessionState::Disconnected | SessionState::Lost => {
                self.state = SessionState::Handshaking;
                self.last_activity = now;
                Ok(())
            }
            from => Err(LinkError::InvalidTransition {
                from,
                to: SessionState::Handshaking,
            }),
        }
    }

    /// Handshaking → Connected, binding `peer`. Also accepted while
    /// Connected, where it rebinds the peer. Returns the previous peer when
    /// it changed.
    pub fn connect(&mut self, peer: SocketAddr, now: Instant) -> Result<Option<SocketAddr>, LinkError> {
        match self.state {
            SessionState::Handshaking | SessionState::Connected => {
                let previous = self.remote.filter(|&old| old != peer);
                if self.state == SessionState::Handshaking || previous.is_some() {
                    self.handshakes += 1;
                    self.connected_at = Some(now);
                }
                self.remote = Some(peer);
                self.state = SessionState::Connected;
                self.last_activity = now;
                Ok(previous)
            }
            from => Err(LinkError::InvalidTransition {
                from,
                to: SessionState::Connected,
            }),
        }
    }

    /// Record activity from the peer.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    /// Connected and silent for at least `window` → Lost.
    pub fn check_liveness(&mut self, now: Instant, window: Duration) -> Result<(), LinkError> {
        if self.state != SessionState::Connected {
            return Ok(());
        }
        let silent_for = self.silent_for(now);
        if silent_for >= window {
            self.state = SessionState::Lost;
            return Err(LinkError::LinkLost { silent_for });
        }
        Ok(())
    }

    /// Apply `policy` to a Lost session: re-enter Handshaking or give up.
    pub fn recover(&mut self, policy: LostPolicy, now: Instant) -> Result<(), LinkError> {
        if self.state != SessionState::Lost {
            return Err(LinkError::InvalidTransition {
                from: self.state,
                to: SessionState::Handshaking,
            });
        }
        match policy {
            LostPolicy::Rehandshake => self.begin_handshake(now),
            LostPolicy::Terminate => Err(LinkError::LinkLost {
                silent_for: self.silent_for(now),
            }),
        }
    }
}

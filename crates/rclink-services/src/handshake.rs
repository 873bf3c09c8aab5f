//! `hiya` handshake for both roles.
//!
//! Controller: send `hiya`, wait for the echo, retry with doubling backoff.
//! Host: wait for `hiya`, echo it, adopt the sender as peer.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use rclink_core::config::SessionConfig;
use rclink_core::wire::HELLO;
use rclink_core::LinkError;

use crate::transport::{self, Inbound};

/// How the host treats a datagram that is not the handshake token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptMode {
    /// First contact: anything but `hiya` is a `HandshakeFailure`.
    Strict,
    /// Re-handshake after a lost link: stray datagrams are skipped.
    Lenient,
}

/// Wait for a controller's `hiya` and echo it. `Ok(None)` on shutdown.
///
/// An expired `timeout` is reported as `LinkLost`.
pub async fn accept(
    socket: &UdpSocket,
    mode: AcceptMode,
    timeout: Option<Duration>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<Option<SocketAddr>, LinkError> {
    let mut buf = vec![0u8; transport::RECV_BUF_LEN];
    let deadline = timeout.map(|t| transport::now() + t);

    loop {
        let remaining = deadline.map(|d| transport::until(d, transport::now()));
        match transport::recv(socket, &mut buf, remaining, shutdown).await? {
            Inbound::Shutdown => return Ok(None),
            Inbound::TimedOut => {
                return Err(LinkError::LinkLost {
                    silent_for: timeout.unwrap_or_default(),
                })
            }
            Inbound::Datagram { len, from } => {
                let data = &buf[..len];
                if data == HELLO {
                    transport::send(socket, &HELLO, from).await?;
                    tracing::debug!(peer = %from, "handshake echoed");
                    return Ok(Some(from));
                }
                match mode {
                    AcceptMode::Strict => return Err(LinkError::handshake_failure(from, data)),
                    AcceptMode::Lenient => {
                        tracing::debug!(peer = %from, len, "not a handshake, skipping");
                    }
                }
            }
        }
    }
}

/// Handshake with the host at `host`. `Ok(false)` on shutdown.
///
/// Datagrams other than the echo from `host` are ignored while waiting.
/// Running out of attempts is `LinkLost`.
pub async fn connect(
    socket: &UdpSocket,
    host: SocketAddr,
    settings: &SessionConfig,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<bool, LinkError> {
    let mut buf = vec![0u8; transport::RECV_BUF_LEN];
    let started = transport::now();
    let attempts = settings.handshake_retries.max(1);

    for attempt in 0..attempts {
        let backoff = settings.backoff(attempt);
        if !backoff.is_zero() {
            tokio::select! {
                _ = shutdown.recv() => return Ok(false),
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        tracing::debug!(attempt = attempt + 1, attempts, %host, "sending handshake");
        transport::send(socket, &HELLO, host).await?;

        let deadline = transport::now() + settings.handshake_timeout();
        loop {
            let remaining = transport::until(deadline, transport::now());
            match transport::recv(socket, &mut buf, Some(remaining), shutdown).await? {
                Inbound::Shutdown => return Ok(false),
                Inbound::TimedOut => break,
                Inbound::Datagram { len, from } if from == host && buf[..len] == HELLO => {
                    tracing::debug!(attempt = attempt + 1, %host, "handshake echo received");
                    return Ok(true);
                }
                Inbound::Datagram { len, from } => {
                    tracing::trace!(peer = %from, len, "ignoring datagram during handshake");
                }
            }
        }
    }

    Err(LinkError::LinkLost {
        silent_for: transport::now().saturating_duration_since(started),
    })
}

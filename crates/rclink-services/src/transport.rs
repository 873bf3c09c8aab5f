//! UDP socket setup and the bounded, cancellable receive every loop uses.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use rclink_core::LinkError;

/// Receive buffer large enough for any datagram either role accepts.
pub const RECV_BUF_LEN: usize = 65_536;

/// Current time on the tokio clock, so paused-clock tests drive liveness.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Bind a UDP socket, asking the OS for `recv_buffer_bytes` of receive
/// buffer first. 0 leaves the OS default. Must be called inside a runtime.
pub fn bind(addr: SocketAddr, recv_buffer_bytes: usize) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    if recv_buffer_bytes > 0 {
        if let Err(e) = socket.set_recv_buffer_size(recv_buffer_bytes) {
            tracing::warn!(error = %e, requested = recv_buffer_bytes, "SO_RCVBUF not applied");
        } else if let Ok(granted) = socket.recv_buffer_size() {
            tracing::debug!(requested = recv_buffer_bytes, granted, "receive buffer sized");
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}

/// Resolve `host:port` to its first address.
pub async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}")))
}

/// Result of one [`recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Datagram { len: usize, from: SocketAddr },
    TimedOut,
    Shutdown,
}

/// Receive one datagram into `buf`, giving up after `timeout` (`None` =
/// no limit) or as soon as `shutdown` fires.
///
/// ICMP-induced `ConnectionRefused`/`ConnectionReset` errors are logged
/// and skipped; any other socket error is fatal.
pub async fn recv(
    socket: &UdpSocket,
    buf: &mut [u8],
    timeout: Option<Duration>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<Inbound, LinkError> {
    loop {
        let result = tokio::select! {
            _ = shutdown.recv() => return Ok(Inbound::Shutdown),
            r = bounded(timeout, socket.recv_from(buf)) => r,
        };
        match result {
            None => return Ok(Inbound::TimedOut),
            Some(Ok((len, from))) => return Ok(Inbound::Datagram { len, from }),
            Some(Err(e)) if is_transient(&e) => {
                tracing::debug!(error = %e, "transient recv error, continuing");
            }
            Some(Err(e)) => return Err(LinkError::Transport(e)),
        }
    }
}

/// Send one datagram, treating the same transient errors as [`recv`] does
/// as a dropped packet.
pub async fn send(socket: &UdpSocket, datagram: &[u8], to: SocketAddr) -> Result<(), LinkError> {
    match socket.send_to(datagram, to).await {
        Ok(_) => Ok(()),
        Err(e) if is_transient(&e) => {
            tracing::debug!(error = %e, peer = %to, "transient send error, datagram dropped");
            Ok(())
        }
        Err(e) => Err(LinkError::Transport(e)),
    }
}

async fn bounded<F: Future>(timeout: Option<Duration>, fut: F) -> Option<F::Output> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

/// Time left until `deadline`, zero if it has passed.
pub fn until(deadline: Instant, now: Instant) -> Duration {
    deadline.saturating_duration_since(now)
}

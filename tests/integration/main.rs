//! rclink integration test harness.
//!
//! Every test runs both roles in-process over real UDP sockets bound to
//! 127.0.0.1 with OS-assigned ports, so tests can run in parallel.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use rclink_core::{ControlVector, LinkConfig, LinkError, SessionState};
use rclink_services::{transport, FrameSource, HostLink, InputSource, LogActuator};

mod control;
mod frames;
mod handshake;
mod liveness;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Defaults with timings shortened so a test finishes in well under a
/// second, and a frame small enough to burst through loopback.
pub fn test_config() -> LinkConfig {
    let mut config = LinkConfig::default();
    config.network.recv_buffer_bytes = 1024 * 1024;
    config.control.rate_hz = 100;
    config.session.handshake_timeout_ms = 100;
    config.session.handshake_retries = 10;
    config.session.backoff_base_ms = 20;
    config.session.backoff_max_ms = 100;
    config.session.keepalive_ms = 50;
    config.session.liveness_ms = 300;
    config.frame.width = 64;
    config.frame.height = 48;
    config.frame.rate_hz = 20;
    config.frame.fragment_timeout_ms = 100;
    config.frame.ack_timeout_ms = 300;
    config
}

pub async fn bind() -> Result<Arc<UdpSocket>> {
    let socket = transport::bind(loopback(), 1024 * 1024).context("bind loopback")?;
    Ok(Arc::new(socket))
}

/// Wait until `rx` holds a value matching `pred`.
pub async fn wait_for<T>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) -> Result<()> {
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .context("timed out waiting for watch value")?
        .context("watch sender dropped")?;
    Ok(())
}

/// Receive one datagram within [`WAIT`].
pub async fn recv(socket: &UdpSocket) -> Result<(Vec<u8>, SocketAddr)> {
    let mut buf = vec![0u8; transport::RECV_BUF_LEN];
    let (len, from) = tokio::time::timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .context("timed out waiting for datagram")??;
    buf.truncate(len);
    Ok((buf, from))
}

/// Input source that always reports the same vector.
pub struct FixedInput(pub ControlVector);

impl InputSource for FixedInput {
    fn sample(&mut self) -> ControlVector {
        self.0.clone()
    }
}

/// A host link running on its own task.
pub struct RunningHost {
    pub addr: SocketAddr,
    pub state: watch::Receiver<SessionState>,
    pub peer: watch::Receiver<Option<SocketAddr>>,
    pub controls: watch::Receiver<ControlVector>,
    pub shutdown: broadcast::Sender<()>,
    pub task: JoinHandle<Result<(), LinkError>>,
}

pub async fn spawn_host(config: LinkConfig, frames: Option<Box<dyn FrameSource>>) -> Result<RunningHost> {
    let socket = bind().await?;
    let addr = socket.local_addr()?;
    let host = HostLink::new(socket, config);
    let (shutdown, _) = broadcast::channel(1);

    Ok(RunningHost {
        addr,
        state: host.state(),
        peer: host.peer(),
        controls: host.controls(),
        task: tokio::spawn(host.run(Box::new(LogActuator::new()), frames, shutdown.clone())),
        shutdown,
    })
}

impl RunningHost {
    pub async fn stop(self) -> Result<(), LinkError> {
        let _ = self.shutdown.send(());
        match tokio::time::timeout(WAIT, self.task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => panic!("host task panicked: {e}"),
            Err(_) => panic!("host did not stop"),
        }
    }
}

//! Controller role: handshake, paced control sending, frame reception.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};

use rclink_core::config::ControlConfig;
use rclink_core::wire::{classify_controller, ControllerInbound, HELLO};
use rclink_core::{control, Frame, LinkConfig, LinkError, Session, SessionState};

use crate::frame_link::FrameReceiver;
use crate::handshake;
use crate::input::InputSource;
use crate::pacer::Pacer;
use crate::transport::{self, Inbound};

pub struct ControllerLink {
    socket: Arc<UdpSocket>,
    host: SocketAddr,
    config: LinkConfig,
    state_tx: watch::Sender<SessionState>,
    frame_tx: watch::Sender<Option<Frame>>,
}

impl ControllerLink {
    pub fn new(socket: Arc<UdpSocket>, host: SocketAddr, config: LinkConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (frame_tx, _) = watch::channel(None);
        Self {
            socket,
            host,
            config,
            state_tx,
            frame_tx,
        }
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Most recent complete frame from the host.
    pub fn frames(&self) -> watch::Receiver<Option<Frame>> {
        self.frame_tx.subscribe()
    }

    /// Run until shutdown or a fatal link error. On return every task the
    /// link spawned has been told to stop via `shutdown`.
    pub async fn run(
        self,
        input: Box<dyn InputSource>,
        shutdown: broadcast::Sender<()>,
    ) -> Result<(), LinkError> {
        let mut stop = shutdown.subscribe();
        let local = self.socket.local_addr()?;
        let mut session = Session::with_remote(local, self.host, transport::now());

        session.begin_handshake(transport::now())?;
        self.publish(&session);
        tracing::info!(%local, host = %self.host, "handshaking");

        if !handshake::connect(&self.socket, self.host, &self.config.session, &mut stop).await? {
            return Ok(());
        }
        session.connect(self.host, transport::now())?;
        self.publish(&session);
        tracing::info!(host = %self.host, "connected");

        let sender = tokio::spawn(send_loop(
            self.socket.clone(),
            self.host,
            input,
            self.config.control.clone(),
            self.config.session.keepalive(),
            self.state_tx.subscribe(),
            shutdown.clone(),
        ));

        let result = self.receive_loop(&mut session, &mut stop).await;
        let _ = shutdown.send(());

        let sent = match sender.await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "control sender task failed");
                Ok(())
            }
        };
        result.and(sent)
    }

    async fn receive_loop(
        &self,
        session: &mut Session,
        stop: &mut broadcast::Receiver<()>,
    ) -> Result<(), LinkError> {
        let mut buf = vec![0u8; transport::RECV_BUF_LEN];
        let mut frames = FrameReceiver::new(&self.config.frame);
        let liveness = self.config.session.liveness();

        loop {
            let now = transport::now();
            frames.expire(now);

            if let Err(e) = session.check_liveness(now, liveness) {
                tracing::warn!(error = %e, host = %self.host, "host went silent");
                self.publish(session);
                frames.reset();
                session.recover(self.config.session.on_lost, now)?;
                self.publish(session);
                tracing::info!(host = %self.host, "re-handshaking");
                if !handshake::connect(&self.socket, self.host, &self.config.session, stop).await? {
                    return Ok(());
                }
                session.connect(self.host, transport::now())?;
                self.publish(session);
                tracing::info!(host = %self.host, handshakes = session.handshakes(), "reconnected");
                continue;
            }

            let timeout = next_timeout(session, &frames, liveness, now);
            match transport::recv(&self.socket, &mut buf, Some(timeout), stop).await? {
                Inbound::Shutdown => {
                    tracing::info!("controller link shutting down");
                    return Ok(());
                }
                Inbound::TimedOut => continue,
                Inbound::Datagram { len, from } if from != self.host => {
                    tracing::debug!(peer = %from, len, "datagram from unknown sender");
                }
                Inbound::Datagram { len, .. } => {
                    self.handle(&buf[..len], session, &mut frames).await?;
                }
            }
        }
    }

    async fn handle(
        &self,
        datagram: &[u8],
        session: &mut Session,
        frames: &mut FrameReceiver,
    ) -> Result<(), LinkError> {
        let now = transport::now();
        let inbound = match classify_controller(datagram, self.config.frame.layout) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::debug!(error = %e, len = datagram.len(), "dropping malformed datagram");
                return Ok(());
            }
        };

        match inbound {
            ControllerInbound::Hello => {
                if session.is_connected() {
                    session.touch(now);
                }
            }
            ControllerInbound::Fragment(fragment) => {
                if !session.is_connected() {
                    tracing::trace!("fragment while not connected, dropping");
                    return Ok(());
                }
                session.touch(now);
                for delivery in frames.push(fragment, now) {
                    self.frame_tx.send_replace(Some(delivery.frame));
                    transport::send(&self.socket, &delivery.ack, self.host).await?;
                }
            }
        }
        Ok(())
    }

    fn publish(&self, session: &Session) {
        self.state_tx.send_replace(session.state());
    }
}

/// Wake up for whichever comes first: the liveness deadline or the frame
/// timeout.
fn next_timeout(session: &Session, frames: &FrameReceiver, liveness: Duration, now: Instant) -> Duration {
    let mut wait = if session.is_connected() {
        liveness.saturating_sub(session.silent_for(now))
    } else {
        liveness
    };
    if let Some(deadline) = frames.deadline() {
        wait = wait.min(transport::until(deadline, now));
    }
    wait
}

/// Paced sender: one control vector per tick while connected, plus a
/// `hiya` keepalive every `keepalive`. Silent while re-handshaking; the
/// receive loop owns the retry budget then.
async fn send_loop(
    socket: Arc<UdpSocket>,
    host: SocketAddr,
    mut input: Box<dyn InputSource>,
    control: ControlConfig,
    keepalive: Duration,
    state: watch::Receiver<SessionState>,
    shutdown: broadcast::Sender<()>,
) -> Result<(), LinkError> {
    let mut stop = shutdown.subscribe();
    let mut pacer = Pacer::new(control.rate_hz);
    let mut last_hello = transport::now();

    loop {
        let current = *state.borrow();
        let now = transport::now();
        let hello_due = now.saturating_duration_since(last_hello) >= keepalive;
        if hello_due {
            last_hello = now;
        }

        let step = tokio::select! {
            _ = stop.recv() => return Ok(()),
            r = pacer.tick(send_once(&socket, host, input.as_mut(), &control, current, hello_due)) => r,
        };
        if let Err(e) = step {
            tracing::error!(error = %e, "control send failed");
            let _ = shutdown.send(());
            return Err(e);
        }
    }
}

async fn send_once(
    socket: &UdpSocket,
    host: SocketAddr,
    input: &mut dyn InputSource,
    config: &ControlConfig,
    state: SessionState,
    hello_due: bool,
) -> Result<(), LinkError> {
    if state != SessionState::Connected {
        return Ok(());
    }
    if hello_due {
        transport::send(socket, &HELLO, host).await?;
    }
    let vector = input.sample().clamped().with_deadzone(config.deadzone);
    transport::send(socket, &control::encode(&vector), host).await
}

//! Actuator-host role: accept a controller, apply its control vectors, and
//! optionally stream frames back.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use rclink_core::config::FrameConfig;
use rclink_core::wire::{classify_host, HostInbound, HELLO};
use rclink_core::{ControlVector, LinkConfig, LinkError, Session, SessionState};

use crate::actuator::{Actuator, PwmMapping};
use crate::frame_link::FrameSender;
use crate::handshake::{self, AcceptMode};
use crate::pacer::Pacer;
use crate::pattern::FrameSource;
use crate::transport::{self, Inbound};

/// Acks buffered between the receive loop and the frame sender.
const ACK_QUEUE: usize = 64;

pub struct HostLink {
    socket: Arc<UdpSocket>,
    config: LinkConfig,
    state_tx: watch::Sender<SessionState>,
    peer_tx: watch::Sender<Option<SocketAddr>>,
    control_tx: watch::Sender<ControlVector>,
}

impl HostLink {
    pub fn new(socket: Arc<UdpSocket>, config: LinkConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (peer_tx, _) = watch::channel(None);
        let (control_tx, _) = watch::channel(ControlVector::neutral(config.control.axis_count));
        Self {
            socket,
            config,
            state_tx,
            peer_tx,
            control_tx,
        }
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn peer(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.peer_tx.subscribe()
    }

    /// Latest control vector from the peer. Reset to neutral when the
    /// link is lost.
    pub fn controls(&self) -> watch::Receiver<ControlVector> {
        self.control_tx.subscribe()
    }

    /// Run until shutdown or a fatal link error. Frames are streamed only
    /// when `frames` is given.
    pub async fn run(
        self,
        actuator: Box<dyn Actuator>,
        frames: Option<Box<dyn FrameSource>>,
        shutdown: broadcast::Sender<()>,
    ) -> Result<(), LinkError> {
        let mut stop = shutdown.subscribe();
        let local = self.socket.local_addr()?;
        let mut session = Session::new(local, transport::now());

        session.begin_handshake(transport::now())?;
        self.publish(&session);
        tracing::info!(%local, "waiting for controller");

        let accepted = handshake::accept(
            &self.socket,
            AcceptMode::Strict,
            self.config.session.accept_timeout(),
            &mut stop,
        )
        .await?;
        let Some(peer) = accepted else {
            return Ok(());
        };
        session.connect(peer, transport::now())?;
        self.publish(&session);
        tracing::info!(%peer, "connected");

        let mut tasks: Vec<JoinHandle<Result<(), LinkError>>> = Vec::new();
        tasks.push(tokio::spawn(actuator_loop(
            actuator,
            PwmMapping::from(&self.config.actuator),
            self.config.control.rate_hz,
            self.control_tx.subscribe(),
            self.state_tx.subscribe(),
            shutdown.subscribe(),
        )));

        let acks = match frames {
            Some(source) => {
                let (ack_tx, ack_rx) = mpsc::channel(ACK_QUEUE);
                tasks.push(tokio::spawn(frame_loop(
                    self.socket.clone(),
                    source,
                    self.config.frame.clone(),
                    ack_rx,
                    self.peer_tx.subscribe(),
                    self.state_tx.subscribe(),
                    shutdown.clone(),
                )));
                Some(ack_tx)
            }
            None => None,
        };

        let mut result = self.receive_loop(&mut session, acks, &mut stop).await;
        let _ = shutdown.send(());

        for task in tasks {
            match task.await {
                Ok(Err(e)) if result.is_ok() => result = Err(e),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "host task failed"),
            }
        }
        result
    }

    async fn receive_loop(
        &self,
        session: &mut Session,
        acks: Option<mpsc::Sender<Option<u16>>>,
        stop: &mut broadcast::Receiver<()>,
    ) -> Result<(), LinkError> {
        let mut buf = vec![0u8; transport::RECV_BUF_LEN];
        let liveness = self.config.session.liveness();

        loop {
            let now = transport::now();
            if let Err(e) = session.check_liveness(now, liveness) {
                tracing::warn!(error = %e, peer = ?session.remote(), "controller went silent");
                self.control_tx
                    .send_replace(ControlVector::neutral(self.config.control.axis_count));
                self.publish(session);
                session.recover(self.config.session.on_lost, now)?;
                self.publish(session);
                tracing::info!("waiting for controller to re-handshake");
                continue;
            }

            let timeout = session
                .is_connected()
                .then(|| liveness.saturating_sub(session.silent_for(now)));
            match transport::recv(&self.socket, &mut buf, timeout, stop).await? {
                Inbound::Shutdown => {
                    tracing::info!("host link shutting down");
                    return Ok(());
                }
                Inbound::TimedOut => continue,
                Inbound::Datagram { len, from } => {
                    self.handle(&buf[..len], from, session, acks.as_ref()).await?;
                }
            }
        }
    }

    async fn handle(
        &self,
        datagram: &[u8],
        from: SocketAddr,
        session: &mut Session,
        acks: Option<&mpsc::Sender<Option<u16>>>,
    ) -> Result<(), LinkError> {
        let now = transport::now();
        let inbound = match classify_host(datagram, self.config.control.axis_count) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::debug!(error = %e, peer = %from, "dropping malformed datagram");
                return Ok(());
            }
        };

        match inbound {
            HostInbound::Hello => {
                transport::send(&self.socket, &HELLO, from).await?;
                match session.state() {
                    SessionState::Handshaking => {
                        session.connect(from, now)?;
                        self.publish(session);
                        tracing::info!(peer = %from, handshakes = session.handshakes(), "connected");
                    }
                    SessionState::Connected => {
                        if let Some(previous) = session.connect(from, now)? {
                            self.publish(session);
                            tracing::warn!(%previous, peer = %from, "rebinding peer");
                        }
                    }
                    _ => {}
                }
            }
            _ if !session.is_connected() || !session.is_peer(from) => {
                tracing::debug!(peer = %from, "datagram from non-peer, dropping");
            }
            HostInbound::Ack(frame_id) => {
                session.touch(now);
                if let Some(tx) = acks {
                    if tx.try_send(frame_id).is_err() {
                        tracing::debug!(?frame_id, "ack queue full, dropping");
                    }
                }
            }
            HostInbound::Control(vector) => {
                session.touch(now);
                tracing::trace!(axes = ?vector.axes(), "control");
                self.control_tx.send_replace(vector);
            }
        }
        Ok(())
    }

    fn publish(&self, session: &Session) {
        self.state_tx.send_replace(session.state());
        self.peer_tx.send_if_modified(|peer| {
            let changed = *peer != session.remote();
            *peer = session.remote();
            changed
        });
    }
}

/// Apply the latest control vector every tick; neutral while not connected
/// and once more on shutdown.
async fn actuator_loop(
    mut actuator: Box<dyn Actuator>,
    mapping: PwmMapping,
    rate_hz: u32,
    controls: watch::Receiver<ControlVector>,
    state: watch::Receiver<SessionState>,
    mut stop: broadcast::Receiver<()>,
) -> Result<(), LinkError> {
    let mut pacer = Pacer::new(rate_hz);
    loop {
        let command = if *state.borrow() == SessionState::Connected {
            mapping.command(&controls.borrow())
        } else {
            mapping.neutral()
        };
        tokio::select! {
            _ = stop.recv() => break,
            _ = pacer.tick(async {
                if let Err(e) = actuator.apply(command) {
                    tracing::warn!(error = %e, "actuator update failed");
                }
            }) => {}
        }
    }
    if let Err(e) = actuator.apply(mapping.neutral()) {
        tracing::warn!(error = %e, "failed to neutralise actuator on shutdown");
    }
    Ok(())
}

/// Offer one frame per tick while connected and the ack window has room.
async fn frame_loop(
    socket: Arc<UdpSocket>,
    mut source: Box<dyn FrameSource>,
    config: FrameConfig,
    mut acks: mpsc::Receiver<Option<u16>>,
    peer: watch::Receiver<Option<SocketAddr>>,
    state: watch::Receiver<SessionState>,
    shutdown: broadcast::Sender<()>,
) -> Result<(), LinkError> {
    let mut stop = shutdown.subscribe();
    let mut pacer = Pacer::new(config.rate_hz);
    let mut sender = FrameSender::new(&config);

    loop {
        while let Ok(frame_id) = acks.try_recv() {
            sender.on_ack(frame_id);
        }
        let target = match (*state.borrow(), *peer.borrow()) {
            (SessionState::Connected, Some(addr)) => Some(addr),
            _ => None,
        };

        let step = tokio::select! {
            _ = stop.recv() => break,
            r = pacer.tick(offer_frame(&socket, &mut sender, source.as_mut(), target)) => r,
        };
        if let Err(e) = step {
            tracing::error!(error = %e, "frame send failed");
            let _ = shutdown.send(());
            return Err(e);
        }
    }
    tracing::debug!(sent = sender.sent(), abandoned = sender.abandoned(), "frame sender stopped");
    Ok(())
}

async fn offer_frame(
    socket: &UdpSocket,
    sender: &mut FrameSender,
    source: &mut dyn FrameSource,
    target: Option<SocketAddr>,
) -> Result<(), LinkError> {
    let Some(peer) = target else {
        sender.reset();
        return Ok(());
    };
    let now = transport::now();
    if !sender.ready(now) {
        return Ok(());
    }

    let frame = source.next_frame();
    let (frame_id, datagrams) = match sender.prepare(&frame, now) {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::warn!(error = %e, "frame cannot be fragmented");
            return Ok(());
        }
    };
    for datagram in &datagrams {
        transport::send(socket, datagram, peer).await?;
    }
    tracing::trace!(frame_id, fragments = datagrams.len(), %peer, "frame sent");
    Ok(())
}

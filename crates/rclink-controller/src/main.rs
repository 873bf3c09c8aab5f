//! rclink-controller — samples operator input and drives a remote host.
//!
//! Input comes from stdin, one sample per line: `<lateral> <longitudinal>`
//! for analog axes, or key letters (`a` `d` `u` `n`) for the keyboard
//! mapping. The first line picks which mapping is used.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{oneshot, watch};

use rclink_core::config::ConfigError;
use rclink_core::{LinkConfig, SessionState};
use rclink_services::input::{self, InputKind, InputLine, LatestLine};
use rclink_services::{transport, ControllerLink};

fn print_usage() {
    eprintln!("Usage: rclink-controller <host> <port> [<local_port>]");
}

fn usage_error() -> ! {
    print_usage();
    std::process::exit(2);
}

/// Read stdin on a plain thread so a pending read never holds up runtime
/// shutdown. The first line decides the mapping.
fn spawn_stdin_reader() -> (oneshot::Receiver<InputKind>, watch::Receiver<InputLine>) {
    let (kind_tx, kind_rx) = oneshot::channel();
    let (line_tx, line_rx) = watch::channel(InputLine::default());

    std::thread::spawn(move || {
        use std::io::BufRead;

        let stdin = std::io::stdin();
        let mut reader = stdin.lock();
        let mut first = String::new();
        if let Err(e) = reader.read_line(&mut first) {
            tracing::warn!(error = %e, "failed to read input");
            return;
        }
        let first = InputLine::parse(&first).unwrap_or_default();
        line_tx.send_replace(first);
        let _ = kind_tx.send(first.kind());

        if let Err(e) = input::feed_lines(reader, &line_tx) {
            tracing::warn!(error = %e, "input stream failed");
        }
    });

    (kind_rx, line_rx)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (host, port, local_port) = match args.as_slice() {
        [host, port] => (host, port.parse::<u16>(), Ok(0)),
        [host, port, local] => (host, port.parse::<u16>(), local.parse::<u16>()),
        _ => usage_error(),
    };
    let (Ok(port), Ok(local_port)) = (port, local_port) else {
        usage_error();
    };

    // Load config
    if let Err(e) = LinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = match LinkConfig::load() {
        Ok(config) => config,
        Err(e @ ConfigError::Invalid(_)) => return Err(e).context("refusing to start"),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            LinkConfig::default()
        }
    };

    let remote = transport::resolve(host, port)
        .await
        .with_context(|| format!("failed to resolve {host}:{port}"))?;
    let unspecified = match remote.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let local = SocketAddr::new(unspecified, local_port);
    let socket = Arc::new(
        transport::bind(local, config.network.recv_buffer_bytes)
            .with_context(|| format!("failed to bind {local}"))?,
    );
    tracing::info!(
        local = %socket.local_addr()?,
        %remote,
        control_hz = config.control.rate_hz,
        "rclink-controller starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    tracing::info!("waiting for first input line");
    let (kind_rx, lines) = spawn_stdin_reader();
    let mut stop = shutdown_tx.subscribe();
    let kind = tokio::select! {
        kind = kind_rx => kind.unwrap_or(InputKind::Analog),
        _ = stop.recv() => return Ok(()),
    };
    tracing::info!(?kind, "input mapping selected");
    let source = input::select(kind, LatestLine::new(lines));

    let link = ControllerLink::new(socket, remote, config);

    let mut state = link.state();
    let state_logger = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow();
            if current == SessionState::Lost {
                tracing::warn!(state = ?current, "session state");
            } else {
                tracing::info!(state = ?current, "session state");
            }
        }
    });

    let mut frames = link.frames();
    let frame_logger = tokio::spawn(async move {
        let mut count: u64 = 0;
        while frames.changed().await.is_ok() {
            count += 1;
            if let Some(frame) = frames.borrow().as_ref() {
                tracing::debug!(count, bytes = frame.pixels().len(), "frame received");
            }
        }
    });

    let result = link.run(source, shutdown_tx).await;
    state_logger.abort();
    frame_logger.abort();
    result.context("controller link failed")?;

    tracing::info!("shutting down");
    Ok(())
}

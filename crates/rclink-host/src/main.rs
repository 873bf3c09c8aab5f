//! rclink-host — actuator host. Waits for a controller, drives the
//! actuators from its control stream and optionally streams frames back.

use std::sync::Arc;

use anyhow::{Context, Result};

use rclink_core::config::ConfigError;
use rclink_core::LinkConfig;
use rclink_services::{transport, FrameSource, HostLink, LogActuator, TestPattern};

fn print_usage() {
    eprintln!("Usage: rclink-host <host> <port>");
}

fn usage_error() -> ! {
    print_usage();
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (host, port) = match args.as_slice() {
        [host, port] => match port.parse::<u16>() {
            Ok(port) => (host.clone(), port),
            Err(_) => usage_error(),
        },
        _ => usage_error(),
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

    let addr = transport::resolve(&host, port)
        .await
        .with_context(|| format!("failed to resolve {host}:{port}"))?;
    let socket = Arc::new(
        transport::bind(addr, config.network.recv_buffer_bytes)
            .with_context(|| format!("failed to bind {addr}"))?,
    );
    tracing::info!(
        %addr,
        control_hz = config.control.rate_hz,
        frames = config.frame.enabled,
        layout = ?config.frame.layout,
        "rclink-host starting"
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

    let frames = config.frame.enabled.then(|| {
        Box::new(TestPattern::new(config.frame.geometry(), config.frame.rate_hz))
            as Box<dyn FrameSource>
    });

    HostLink::new(socket, config)
        .run(Box::new(LogActuator::new()), frames, shutdown_tx)
        .await
        .context("host link failed")?;

    tracing::info!("shutting down");
    Ok(())
}

use crate::*;

/// Controller sends `hiya`; the host adopts the observed address as its
/// peer and echoes the token.
#[tokio::test]
async fn test_host_accepts_hiya_and_echoes() -> Result<()> {
    let mut host = spawn_host(test_config(), None).await?;
    let controller = bind().await?;

    controller.send_to(b"hiya", host.addr).await?;

    let (echo, from) = recv(&controller).await?;
    assert_eq!(echo, b"hiya");
    assert_eq!(from, host.addr);

    let me = controller.local_addr()?;
    wait_for(&mut host.state, |s| *s == SessionState::Connected).await?;
    wait_for(&mut host.peer, |p| *p == Some(me)).await?;

    host.stop().await?;
    Ok(())
}

/// Anything but `hiya` as the first datagram aborts the host.
#[tokio::test]
async fn test_first_datagram_must_be_hiya() -> Result<()> {
    let host = spawn_host(test_config(), None).await?;
    let stranger = bind().await?;

    stranger.send_to(&[0x3F, 0, 0, 0, 0x3F, 0, 0, 0], host.addr).await?;

    let result = tokio::time::timeout(WAIT, host.task).await??;
    match result {
        Err(e @ LinkError::HandshakeFailure { .. }) => {
            assert!(e.to_string().starts_with("Something went wrong"));
        }
        other => panic!("expected HandshakeFailure, got {other:?}"),
    }
    Ok(())
}

/// The host's first wait honours the accept timeout.
#[tokio::test]
async fn test_accept_timeout() -> Result<()> {
    let mut config = test_config();
    config.session.accept_timeout_ms = 100;
    let host = spawn_host(config, None).await?;

    let result = tokio::time::timeout(WAIT, host.task).await??;
    assert!(matches!(result, Err(LinkError::LinkLost { .. })));
    Ok(())
}

/// Shutdown while waiting for a controller is a clean exit.
#[tokio::test]
async fn test_shutdown_before_handshake() -> Result<()> {
    let host = spawn_host(test_config(), None).await?;
    host.stop().await?;
    Ok(())
}

/// A `hiya` from a new address rebinds the peer.
#[tokio::test]
async fn test_keepalive_from_new_port_rebinds() -> Result<()> {
    let mut host = spawn_host(test_config(), None).await?;
    let first = bind().await?;
    let second = bind().await?;

    first.send_to(b"hiya", host.addr).await?;
    recv(&first).await?;
    let first_addr = first.local_addr()?;
    wait_for(&mut host.peer, |p| *p == Some(first_addr)).await?;

    second.send_to(b"hiya", host.addr).await?;
    recv(&second).await?;
    let second_addr = second.local_addr()?;
    wait_for(&mut host.peer, |p| *p == Some(second_addr)).await?;
    assert_eq!(*host.state.borrow(), SessionState::Connected);

    host.stop().await?;
    Ok(())
}

use crate::*;
use rclink_core::LostPolicy;
use rclink_services::ControllerLink;

/// Connect a raw controller socket and send one control vector.
async fn connect_raw(host: SocketAddr) -> Result<Arc<UdpSocket>> {
    let controller = bind().await?;
    controller.send_to(b"hiya", host).await?;
    recv(&controller).await?;
    controller
        .send_to(&[0x3F, 0x80, 0, 0, 0x3F, 0x80, 0, 0], host)
        .await?;
    Ok(controller)
}

/// A silent controller is declared lost; the host neutralises its control
/// slot and waits for a new handshake.
#[tokio::test]
async fn test_host_loses_silent_controller() -> Result<()> {
    let mut host = spawn_host(test_config(), None).await?;
    let _controller = connect_raw(host.addr).await?;
    wait_for(&mut host.controls, |v| v.axes() == [1.0, 1.0]).await?;

    wait_for(&mut host.state, |s| *s == SessionState::Handshaking).await?;
    assert_eq!(host.controls.borrow().axes(), &[0.0, 0.0]);

    // A fresh controller is accepted after the loss.
    let replacement = bind().await?;
    replacement.send_to(b"hiya", host.addr).await?;
    let (echo, _) = recv(&replacement).await?;
    assert_eq!(echo, b"hiya");
    let replacement_addr = replacement.local_addr()?;
    wait_for(&mut host.state, |s| *s == SessionState::Connected).await?;
    wait_for(&mut host.peer, |p| *p == Some(replacement_addr)).await?;

    host.stop().await?;
    Ok(())
}

/// While re-handshaking, control from the old peer is ignored.
#[tokio::test]
async fn test_lost_host_ignores_stale_control() -> Result<()> {
    let mut host = spawn_host(test_config(), None).await?;
    let controller = connect_raw(host.addr).await?;
    wait_for(&mut host.controls, |v| v.axes() == [1.0, 1.0]).await?;
    wait_for(&mut host.state, |s| *s == SessionState::Handshaking).await?;

    controller
        .send_to(&[0xBF, 0x80, 0, 0, 0xBF, 0x80, 0, 0], host.addr)
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(host.controls.borrow().axes(), &[0.0, 0.0]);
    assert_eq!(*host.state.borrow(), SessionState::Handshaking);

    host.stop().await?;
    Ok(())
}

/// With `on_lost = terminate` the host exits with `LinkLost`.
#[tokio::test]
async fn test_host_terminates_on_lost() -> Result<()> {
    let mut config = test_config();
    config.session.on_lost = LostPolicy::Terminate;
    let host = spawn_host(config, None).await?;
    let _controller = connect_raw(host.addr).await?;

    let result = tokio::time::timeout(WAIT, host.task).await??;
    assert!(matches!(result, Err(LinkError::LinkLost { .. })));
    Ok(())
}

/// The controller notices when the host stops echoing its keepalives.
#[tokio::test]
async fn test_controller_loses_silent_host() -> Result<()> {
    let host = bind().await?;
    let mut config = test_config();
    config.session.on_lost = LostPolicy::Terminate;

    let link = ControllerLink::new(bind().await?, host.local_addr()?, config);
    let mut state = link.state();
    let (shutdown, _) = broadcast::channel(1);
    let task = tokio::spawn(link.run(Box::new(FixedInput(ControlVector::neutral(2))), shutdown));

    // Answer the handshake once, then go quiet.
    let (hello, controller) = recv(&host).await?;
    assert_eq!(hello, b"hiya");
    host.send_to(b"hiya", controller).await?;
    wait_for(&mut state, |s| *s == SessionState::Connected).await?;

    wait_for(&mut state, |s| *s == SessionState::Lost).await?;
    let result = tokio::time::timeout(WAIT, task).await??;
    assert!(matches!(result, Err(LinkError::LinkLost { .. })));
    Ok(())
}

/// After a loss the controller re-handshakes on the same retry budget as
/// its first connect, and gives up with `LinkLost` when it runs out.
#[tokio::test]
async fn test_controller_rehandshake_is_bounded() -> Result<()> {
    let host = bind().await?;
    let mut config = test_config();
    config.session.handshake_retries = 3;
    config.session.handshake_timeout_ms = 50;

    let link = ControllerLink::new(bind().await?, host.local_addr()?, config);
    let mut state = link.state();
    let (shutdown, _) = broadcast::channel(1);
    let task = tokio::spawn(link.run(Box::new(FixedInput(ControlVector::neutral(2))), shutdown));

    let (hello, controller) = recv(&host).await?;
    assert_eq!(hello, b"hiya");
    host.send_to(b"hiya", controller).await?;
    wait_for(&mut state, |s| *s == SessionState::Connected).await?;

    wait_for(&mut state, |s| *s == SessionState::Handshaking).await?;
    let result = tokio::time::timeout(WAIT, task).await??;
    assert!(matches!(result, Err(LinkError::LinkLost { .. })));
    Ok(())
}

/// A host that answers again during the re-handshake gets the session back.
#[tokio::test]
async fn test_controller_rehandshakes_after_loss() -> Result<()> {
    let host = bind().await?;
    let link = ControllerLink::new(bind().await?, host.local_addr()?, test_config());
    let mut state = link.state();
    let (shutdown, _) = broadcast::channel(1);
    let task = tokio::spawn(link.run(
        Box::new(FixedInput(ControlVector::neutral(2))),
        shutdown.clone(),
    ));

    let (_, controller) = recv(&host).await?;
    host.send_to(b"hiya", controller).await?;
    wait_for(&mut state, |s| *s == SessionState::Connected).await?;
    wait_for(&mut state, |s| *s == SessionState::Handshaking).await?;

    // Drain what was sent before the loss, then answer the next `hiya`.
    loop {
        let (datagram, _) = recv(&host).await?;
        if datagram == b"hiya" && *state.borrow() == SessionState::Handshaking {
            host.send_to(b"hiya", controller).await?;
            break;
        }
    }
    wait_for(&mut state, |s| *s == SessionState::Connected).await?;

    let _ = shutdown.send(());
    tokio::time::timeout(WAIT, task).await???;
    Ok(())
}

/// A controller that keeps its keepalives flowing is never declared lost,
/// even well past the liveness window.
#[tokio::test]
async fn test_keepalive_holds_session_open() -> Result<()> {
    let mut host = spawn_host(test_config(), None).await?;
    let link = ControllerLink::new(bind().await?, host.addr, test_config());
    let mut state = link.state();
    let (shutdown, _) = broadcast::channel(1);
    let task = tokio::spawn(link.run(
        Box::new(FixedInput(ControlVector::neutral(2))),
        shutdown.clone(),
    ));

    wait_for(&mut state, |s| *s == SessionState::Connected).await?;
    wait_for(&mut host.state, |s| *s == SessionState::Connected).await?;
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(*state.borrow(), SessionState::Connected);
    assert_eq!(*host.state.borrow(), SessionState::Connected);
    assert!(!host.state.has_changed()?, "host session flapped");

    let _ = shutdown.send(());
    tokio::time::timeout(WAIT, task).await???;
    host.stop().await?;
    Ok(())
}

use crate::*;
use rclink_services::ControllerLink;

async fn spawn_controller(
    host: SocketAddr,
    config: LinkConfig,
    input: ControlVector,
) -> Result<(watch::Receiver<SessionState>, broadcast::Sender<()>, JoinHandle<Result<(), LinkError>>)> {
    let socket = bind().await?;
    let link = ControllerLink::new(socket, host, config);
    let state = link.state();
    let (shutdown, _) = broadcast::channel(1);
    let task = tokio::spawn(link.run(Box::new(FixedInput(input)), shutdown.clone()));
    Ok((state, shutdown, task))
}

/// Vectors from the controller's input reach the host's control slot.
#[tokio::test]
async fn test_control_reaches_host() -> Result<()> {
    let mut host = spawn_host(test_config(), None).await?;
    let (mut state, shutdown, task) = spawn_controller(
        host.addr,
        test_config(),
        ControlVector::steering_throttle(-1.0, 0.5),
    )
    .await?;

    wait_for(&mut state, |s| *s == SessionState::Connected).await?;
    wait_for(&mut host.controls, |v| v.axes() == [-1.0, 0.5]).await?;

    let _ = shutdown.send(());
    tokio::time::timeout(WAIT, task).await???;
    host.stop().await?;
    Ok(())
}

/// Readings inside the deadzone arrive as exactly zero.
#[tokio::test]
async fn test_deadzone_zeroes_small_axes() -> Result<()> {
    let mut host = spawn_host(test_config(), None).await?;
    let (_state, shutdown, task) = spawn_controller(
        host.addr,
        test_config(),
        ControlVector::steering_throttle(0.1, -0.6),
    )
    .await?;

    wait_for(&mut host.controls, |v| v.axes() == [0.0, -0.6]).await?;

    let _ = shutdown.send(());
    tokio::time::timeout(WAIT, task).await???;
    host.stop().await?;
    Ok(())
}

/// Raw control datagram: (-1.0, 0.5) is BF800000 3F000000 on the wire.
#[tokio::test]
async fn test_raw_control_datagram() -> Result<()> {
    let mut host = spawn_host(test_config(), None).await?;
    let controller = bind().await?;

    controller.send_to(b"hiya", host.addr).await?;
    recv(&controller).await?;
    controller
        .send_to(&[0xBF, 0x80, 0x00, 0x00, 0x3F, 0x00, 0x00, 0x00], host.addr)
        .await?;

    wait_for(&mut host.controls, |v| v.axes() == [-1.0, 0.5]).await?;

    // Malformed datagrams are dropped without disturbing the link.
    controller.send_to(&[1, 2, 3], host.addr).await?;
    controller.send_to(&[0, 0, 0, 0, 0, 0, 0, 0], host.addr).await?;
    wait_for(&mut host.controls, |v| v.axes() == [0.0, 0.0]).await?;
    assert_eq!(*host.state.borrow(), SessionState::Connected);

    host.stop().await?;
    Ok(())
}

/// The controller gives up when nobody answers.
#[tokio::test]
async fn test_controller_handshake_exhausts_retries() -> Result<()> {
    let silent = bind().await?;
    let mut config = test_config();
    config.session.handshake_retries = 2;
    config.session.handshake_timeout_ms = 50;

    let (_state, _shutdown, task) = spawn_controller(
        silent.local_addr()?,
        config,
        ControlVector::neutral(2),
    )
    .await?;

    let result = tokio::time::timeout(WAIT, task).await??;
    assert!(matches!(result, Err(LinkError::LinkLost { .. })));
    Ok(())
}

/// Off-range and non-finite input never reaches the wire.
#[tokio::test]
async fn test_wild_input_is_clamped_on_the_wire() -> Result<()> {
    let host = bind().await?;
    let (_state, shutdown, task) = spawn_controller(
        host.local_addr()?,
        test_config(),
        ControlVector::steering_throttle(5.0, f32::NAN),
    )
    .await?;

    let (hello, controller) = recv(&host).await?;
    assert_eq!(hello, b"hiya");
    host.send_to(b"hiya", controller).await?;

    let control = loop {
        let (datagram, _) = recv(&host).await?;
        if datagram.len() == 8 {
            break datagram;
        }
    };
    let lateral = f32::from_be_bytes([control[0], control[1], control[2], control[3]]);
    let longitudinal = f32::from_be_bytes([control[4], control[5], control[6], control[7]]);
    assert_eq!((lateral, longitudinal), (1.0, 0.0));

    let _ = shutdown.send(());
    tokio::time::timeout(WAIT, task).await???;
    Ok(())
}

/// While Connected, control from any address but the peer is dropped.
#[tokio::test]
async fn test_connected_host_drops_control_from_stranger() -> Result<()> {
    let mut host = spawn_host(test_config(), None).await?;
    let controller = bind().await?;
    let stranger = bind().await?;

    controller.send_to(b"hiya", host.addr).await?;
    recv(&controller).await?;
    controller
        .send_to(&[0x3F, 0x80, 0, 0, 0x3F, 0x80, 0, 0], host.addr)
        .await?;
    wait_for(&mut host.controls, |v| v.axes() == [1.0, 1.0]).await?;

    stranger
        .send_to(&[0xBF, 0x80, 0, 0, 0xBF, 0x80, 0, 0], host.addr)
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(host.controls.borrow().axes(), &[1.0, 1.0]);
    assert_eq!(*host.state.borrow(), SessionState::Connected);
    assert_eq!(*host.peer.borrow(), Some(controller.local_addr()?));

    host.stop().await?;
    Ok(())
}

use crate::*;
use bytes::Bytes;
use rclink_core::fragment::fragment_datagrams;
use rclink_core::wire::{decode_fragment, FragmentLayout};
use rclink_core::{Frame, FrameGeometry};
use rclink_services::{ControllerLink, TestPattern};

fn pattern(config: &LinkConfig) -> Option<Box<dyn FrameSource>> {
    Some(Box::new(TestPattern::new(config.frame.geometry(), config.frame.rate_hz)))
}

async fn stream_frames(layout: FragmentLayout) -> Result<()> {
    let mut config = test_config();
    config.frame.layout = layout;
    config.frame.enabled = true;

    let host = spawn_host(config.clone(), pattern(&config)).await?;
    let link = ControllerLink::new(bind().await?, host.addr, config.clone());
    let mut frames = link.frames();
    let (shutdown, _) = broadcast::channel(1);
    let task = tokio::spawn(link.run(Box::new(FixedInput(ControlVector::neutral(2))), shutdown.clone()));

    // A second frame only goes out after the first was acknowledged or
    // expired, so receiving three proves the ack path is live.
    let mut received: Vec<Frame> = Vec::new();
    while received.len() < 3 {
        tokio::time::timeout(WAIT, frames.changed()).await??;
        if let Some(frame) = frames.borrow_and_update().clone() {
            received.push(frame);
        }
    }

    let geometry = FrameGeometry::new(64, 48, 3);
    for frame in &received {
        assert_eq!(frame.geometry(), geometry);
        assert_eq!(frame.pixels().len(), geometry.byte_len());
        assert_eq!(frame.pixel(0, 0), Some(&[255u8, 255, 255][..]));
        assert_eq!(frame.pixel(40, 0), Some(&[0u8, 0, 0][..]));
    }

    let _ = shutdown.send(());
    tokio::time::timeout(WAIT, task).await???;
    host.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_counted_frames_reach_controller() -> Result<()> {
    stream_frames(FragmentLayout::Counted).await
}

#[tokio::test]
async fn test_indexed_frames_reach_controller() -> Result<()> {
    stream_frames(FragmentLayout::Indexed).await
}

/// With lockstep acks, the host sends nothing more until the frame is
/// acknowledged; `g2g!` plus the frame id releases the next one.
#[tokio::test]
async fn test_lockstep_waits_for_ack() -> Result<()> {
    let mut config = test_config();
    config.frame.enabled = true;
    // Long enough that expiry cannot release the window during the test.
    config.frame.ack_timeout_ms = 10_000;
    let geometry = config.frame.geometry();
    let expected = config.frame.fragment_count();

    let host = spawn_host(config.clone(), pattern(&config)).await?;
    let controller = bind().await?;
    controller.send_to(b"hiya", host.addr).await?;
    let (echo, _) = recv(&controller).await?;
    assert_eq!(echo, b"hiya");

    let first = collect_frame(&controller, expected, &[]).await?;
    assert_eq!(first.0, 0);
    assert_eq!(first.1, geometry.byte_len());

    // Keep the host alive but do not ack: nothing but echoes may arrive.
    let quiet = tokio::time::Instant::now() + Duration::from_millis(250);
    while tokio::time::Instant::now() < quiet {
        controller.send_to(b"hiya", host.addr).await?;
        let (datagram, _) = recv(&controller).await?;
        assert_eq!(datagram, b"hiya", "frame sent before ack");
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    controller.send_to(b"g2g!\x00\x00", host.addr).await?;
    let second = collect_frame(&controller, expected, b"hiya").await?;
    assert_eq!(second.0, 1);

    host.stop().await?;
    Ok(())
}

/// Fragments that do not come from the host never make a frame.
#[tokio::test]
async fn test_controller_ignores_fragments_from_stranger() -> Result<()> {
    let config = test_config();
    let geometry = config.frame.geometry();
    let chunk = config.frame.max_chunk_bytes;
    let host = bind().await?;
    let stranger = bind().await?;

    let link = ControllerLink::new(bind().await?, host.local_addr()?, config.clone());
    let mut state = link.state();
    let mut frames = link.frames();
    let (shutdown, _) = broadcast::channel(1);
    let task = tokio::spawn(link.run(Box::new(FixedInput(ControlVector::neutral(2))), shutdown.clone()));

    let (_, controller) = recv(&host).await?;
    host.send_to(b"hiya", controller).await?;
    wait_for(&mut state, |s| *s == SessionState::Connected).await?;

    let forged = Bytes::from(vec![0xAA; geometry.byte_len()]);
    for datagram in fragment_datagrams(&forged, chunk, FragmentLayout::Counted, 0)? {
        stranger.send_to(&datagram, controller).await?;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!frames.has_changed()?, "frame assembled from a stranger");

    let real = Bytes::from(vec![0x55; geometry.byte_len()]);
    for datagram in fragment_datagrams(&real, chunk, FragmentLayout::Counted, 1)? {
        host.send_to(&datagram, controller).await?;
    }
    tokio::time::timeout(WAIT, frames.changed()).await??;
    let frame = frames.borrow_and_update().clone().context("no frame published")?;
    assert!(frame.pixels().iter().all(|&b| b == 0x55));

    let _ = shutdown.send(());
    tokio::time::timeout(WAIT, task).await???;
    Ok(())
}

/// Read fragments until one whole counted frame arrived. Returns its id
/// and byte count. Datagrams equal to `skip` are ignored.
async fn collect_frame(socket: &UdpSocket, expected: usize, skip: &[u8]) -> Result<(u16, usize)> {
    let mut seen = vec![false; expected];
    let mut bytes = 0;
    let mut frame_id = None;
    while seen.iter().any(|s| !s) {
        let (datagram, _) = recv(socket).await?;
        if datagram == skip {
            continue;
        }
        let fragment = decode_fragment(&datagram, FragmentLayout::Counted)?;
        let tag = fragment.tag.context("counted fragment without tag")?;
        assert_eq!(tag.count as usize, expected);
        assert_eq!(*frame_id.get_or_insert(tag.frame_id), tag.frame_id);
        let slot = &mut seen[fragment.index as usize];
        if !*slot {
            *slot = true;
            bytes += fragment.payload.len();
        }
    }
    Ok((frame_id.unwrap_or_default(), bytes))
}

use super::mock::{MockConnector, Sent, ServerEnd};
use super::*;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{advance, Instant};

fn config() -> ChannelConfig {
    ChannelConfig {
        url: "mock://relay".to_string(),
        retry_delay_ms: 3000,
        liveness_interval_ms: 5000,
        handshake_timeout_ms: 2000,
    }
}

async fn wait_for_state(handle: &ChannelHandle, wanted: ChannelState) {
    let mut rx = handle.subscribe_state();
    rx.wait_for(|s| *s == wanted).await.unwrap();
}

async fn accept(accepted: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    accepted.recv().await.expect("connector dropped")
}

#[tokio::test(start_paused = true)]
async fn test_opens_on_successful_handshake() {
    let (connector, mut accepted) = MockConnector::new();
    let (handle, _inbound) = spawn(config(), connector.clone());

    let _server = accept(&mut accepted).await;
    wait_for_state(&handle, ChannelState::Open).await;

    assert!(handle.is_open());
    assert_eq!(connector.attempts(), 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_each_peer_close_with_fixed_delay() {
    let (connector, mut accepted) = MockConnector::new();
    let (handle, _inbound) = spawn(config(), connector.clone());

    let mut server = accept(&mut accepted).await;
    wait_for_state(&handle, ChannelState::Open).await;

    for (i, code) in [1001u16, 1006, 4000, 1000].into_iter().enumerate() {
        server.close(code);
        wait_for_state(&handle, ChannelState::Closed).await;
        let closed_at = Instant::now();

        server = accept(&mut accepted).await;
        wait_for_state(&handle, ChannelState::Open).await;

        // Constant delay, not backoff
        let elapsed = closed_at.elapsed();
        assert!(elapsed >= Duration::from_millis(3000), "cycle {}: {:?}", i, elapsed);
        assert!(elapsed < Duration::from_millis(3100), "cycle {}: {:?}", i, elapsed);
    }

    assert_eq!(connector.attempts(), 5);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stream_end_triggers_reconnect() {
    let (connector, mut accepted) = MockConnector::new();
    let (handle, _inbound) = spawn(config(), connector.clone());

    let server = accept(&mut accepted).await;
    wait_for_state(&handle, ChannelState::Open).await;

    // Network drop: peer vanishes without a close frame
    drop(server);
    wait_for_state(&handle, ChannelState::Closed).await;

    let _server = accept(&mut accepted).await;
    wait_for_state(&handle, ChannelState::Open).await;
    assert_eq!(connector.attempts(), 2);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_handshake_retries_indefinitely() {
    let (connector, mut accepted) = MockConnector::new();
    connector.refuse.store(true, std::sync::atomic::Ordering::SeqCst);
    let (handle, _inbound) = spawn(config(), connector.clone());

    let started = Instant::now();
    wait_for_state(&handle, ChannelState::Closed).await;
    assert_eq!(connector.attempts(), 1);

    while connector.attempts() < 3 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    // Two fixed delays between three attempts
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(6000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(6200), "{:?}", elapsed);

    // Backend comes back
    connector.refuse.store(false, std::sync::atomic::Ordering::SeqCst);
    let _server = accept(&mut accepted).await;
    wait_for_state(&handle, ChannelState::Open).await;
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stalled_handshake_times_out_and_retries() {
    let (connector, mut accepted) = MockConnector::new();
    connector.stall.store(true, std::sync::atomic::Ordering::SeqCst);
    let (handle, _inbound) = spawn(config(), connector.clone());

    let started = Instant::now();
    wait_for_state(&handle, ChannelState::Connecting).await;
    wait_for_state(&handle, ChannelState::Closed).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2100), "{:?}", elapsed);
    assert_eq!(connector.attempts(), 1);

    // Handshake bound plus the fixed delay before the next attempt
    while connector.attempts() < 2 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(5000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(5200), "{:?}", elapsed);

    // The relay answers again
    connector.stall.store(false, std::sync::atomic::Ordering::SeqCst);
    let _server = accept(&mut accepted).await;
    wait_for_state(&handle, ChannelState::Open).await;
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_liveness_ping_while_open_and_none_after_close() {
    let (connector, mut accepted) = MockConnector::new();
    let (handle, _inbound) = spawn(config(), connector);

    let mut server = accept(&mut accepted).await;
    wait_for_state(&handle, ChannelState::Open).await;
    let opened_at = Instant::now();

    let first = server.from_client.recv().await.unwrap();
    assert_eq!(first, Sent::Text(r#"{"type":"ping"}"#.to_string()));
    let elapsed = opened_at.elapsed();
    assert!(elapsed >= Duration::from_millis(5000) && elapsed < Duration::from_millis(5100));

    let second = server.from_client.recv().await.unwrap();
    assert_eq!(second, Sent::Text(r#"{"type":"ping"}"#.to_string()));
    let elapsed = opened_at.elapsed();
    assert!(elapsed >= Duration::from_millis(10000) && elapsed < Duration::from_millis(10100));

    server.close(1001);
    wait_for_state(&handle, ChannelState::Closed).await;

    // The old session's transport is gone: nothing more arrives on it
    assert_eq!(server.from_client.recv().await, None);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_and_malformed_frames_are_dropped() {
    let (connector, mut accepted) = MockConnector::new();
    let (handle, mut inbound) = spawn(config(), connector.clone());

    let server = accept(&mut accepted).await;
    wait_for_state(&handle, ChannelState::Open).await;

    server.push_text(r#"{"type":"bogus"}"#);
    server.push_text("{not json");
    server.push_text(r#"{"stopId":1}"#);
    server.push_text(r#"{"type":"admin_message","content":"테스트"}"#);

    let event = inbound.recv().await.unwrap();
    assert_eq!(
        event,
        InboundEvent::AdminMessage {
            content: "테스트".to_string(),
            timestamp: None,
        }
    );
    assert!(matches!(inbound.try_recv(), Err(TryRecvError::Empty)));
    assert!(handle.is_open());
    assert_eq!(connector.attempts(), 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_inbound_events_keep_arrival_order() {
    let (connector, mut accepted) = MockConnector::new();
    let (handle, mut inbound) = spawn(config(), connector);

    let server = accept(&mut accepted).await;
    wait_for_state(&handle, ChannelState::Open).await;

    for content in ["first", "second", "third"] {
        server.push_text(&format!(r#"{{"type":"admin_message","content":"{}"}}"#, content));
    }

    for expected in ["first", "second", "third"] {
        match inbound.recv().await.unwrap() {
            InboundEvent::AdminMessage { content, .. } => assert_eq!(content, expected),
            other => panic!("Expected admin_message, got {:?}", other),
        }
    }
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_open_channel() {
    let connector = MockConnector::refusing();
    let (handle, _inbound) = spawn(config(), connector);

    wait_for_state(&handle, ChannelState::Closed).await;
    let result = handle.send(&OutboundEvent::Ping);
    assert_eq!(result, Err(ChannelError::NotOpen(ChannelState::Closed)));

    let result = handle.deliver(&OutboundEvent::Ping).await;
    assert_eq!(result, Err(ChannelError::NotOpen(ChannelState::Closed)));
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deliver_resolves_after_write() {
    let (connector, mut accepted) = MockConnector::new();
    let (handle, _inbound) = spawn(config(), connector);

    let mut server = accept(&mut accepted).await;
    wait_for_state(&handle, ChannelState::Open).await;

    handle
        .deliver(&OutboundEvent::AdminMessage {
            content: "hello".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(
        server.from_client.recv().await.unwrap(),
        Sent::Text(r#"{"type":"admin_message","content":"hello"}"#.to_string())
    );
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_open_sends_normal_closure() {
    let (connector, mut accepted) = MockConnector::new();
    let (handle, _inbound) = spawn(config(), connector.clone());

    let mut server = accept(&mut accepted).await;
    wait_for_state(&handle, ChannelState::Open).await;
    let state_rx = handle.subscribe_state();

    handle.shutdown().await;

    assert_eq!(server.from_client.recv().await, Some(Sent::Close(NORMAL_CLOSURE)));
    assert_eq!(*state_rx.borrow(), ChannelState::Closed);

    // Terminal: no reconnect is ever scheduled
    advance(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(matches!(accepted.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_reconnect() {
    let connector = MockConnector::refusing();
    let (handle, _inbound) = spawn(config(), connector.clone());

    wait_for_state(&handle, ChannelState::Closed).await;
    assert_eq!(connector.attempts(), 1);

    handle.shutdown().await;

    advance(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_stops_the_task() {
    let connector = MockConnector::refusing();
    let (handle, mut inbound) = spawn(config(), connector.clone());

    wait_for_state(&handle, ChannelState::Closed).await;
    drop(handle);

    // Aborted task releases the inbound sender
    assert_eq!(inbound.recv().await, None);
    advance(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
}

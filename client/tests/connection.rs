mod common;

use std::time::Duration;

use client::{Clock, ConnectionEvent, ConnectionManager, ConnectionState, OffloadError};
use comms::msg::{CloseCode, Msg};
use common::{QueueConnector, config, remote_channel};
use tokio::time::{self, Instant};

#[tokio::test]
async fn send_before_connect_is_not_connected() {
    let connector = QueueConnector::default();
    let (manager, _events) = ConnectionManager::new(connector.clone(), &config(3), Clock::new());

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(matches!(
        manager.send(&[1, 2, 3]).await,
        Err(OffloadError::NotConnected)
    ));
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn open_connection_sends_binary_frames() {
    let connector = QueueConnector::default();
    let remote = connector.push();
    let (mut manager, mut events) =
        ConnectionManager::new(connector.clone(), &config(3), Clock::new());

    manager.connect();
    manager.wait_until_open().await;
    assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

    manager.send(&[0xde, 0xad, 0xbe, 0xef]).await.unwrap();

    let (mut rx, _tx) = remote_channel(remote);
    let mut buf = Vec::new();
    let msg: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert_eq!(msg, Msg::Binary(&[0xde, 0xad, 0xbe, 0xef]));

    // A second connect while open must not open another transport.
    manager.connect();
    assert_eq!(connector.attempts(), 1);

    manager.close().await;
}

#[tokio::test]
async fn inbound_messages_are_stamped_and_forwarded() {
    let connector = QueueConnector::default();
    let remote = connector.push();
    let clock = Clock::new();
    let (mut manager, mut events) = ConnectionManager::new(connector, &config(3), clock);

    manager.connect();
    assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

    let (_rx, mut tx) = remote_channel(remote);
    let before = clock.now_ms();
    tx.send(&Msg::Text(r#"{"type":"error","message":"x"}"#.into()))
        .await
        .unwrap();
    tx.send(&Msg::Binary(&[7])).await.unwrap();

    let Some(ConnectionEvent::Frame(text)) = events.recv().await else {
        panic!("expected a frame event");
    };
    assert_eq!(text.bytes, br#"{"type":"error","message":"x"}"#);
    assert!(text.received_at >= before);
    assert!(text.received_at <= clock.now_ms());

    let Some(ConnectionEvent::Frame(binary)) = events.recv().await else {
        panic!("expected a frame event");
    };
    assert_eq!(binary.bytes, [7]);
    assert!(binary.received_at >= text.received_at);

    manager.close().await;
}

#[tokio::test]
async fn normal_close_from_the_peer_is_terminal() {
    let connector = QueueConnector::default();
    let remote = connector.push();
    connector.push();
    let (mut manager, mut events) =
        ConnectionManager::new(connector.clone(), &config(3), Clock::new());

    manager.connect();
    assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

    let (_rx, mut tx) = remote_channel(remote);
    tx.send(&Msg::Close(CloseCode::NORMAL)).await.unwrap();

    assert_eq!(
        events.recv().await,
        Some(ConnectionEvent::Closed {
            code: CloseCode::NORMAL
        })
    );

    let mut state = manager.subscribe();
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();

    assert_eq!(connector.attempts(), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects() {
    let connector = QueueConnector::default();
    let first = connector.push();
    let second = connector.push();
    let (mut manager, mut events) =
        ConnectionManager::new(connector.clone(), &config(3), Clock::new());

    manager.connect();
    assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

    // Going away without a close message.
    drop(first);

    assert_eq!(
        events.recv().await,
        Some(ConnectionEvent::Closed {
            code: CloseCode::ABNORMAL
        })
    );
    assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));
    assert_eq!(connector.attempts(), 2);

    manager.send(&[1]).await.unwrap();
    let (mut rx, _tx) = remote_channel(second);
    let mut buf = Vec::new();
    let msg: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert_eq!(msg, Msg::Binary(&[1]));

    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let connector = QueueConnector::default();
    let (mut manager, mut events) =
        ConnectionManager::new(connector.clone(), &config(3), Clock::new());

    manager.connect();

    let mut failed_at = Vec::new();
    for _ in 0..4 {
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Closed {
                code: CloseCode::ABNORMAL
            })
        );
        failed_at.push(Instant::now());
    }
    assert_eq!(
        events.recv().await,
        Some(ConnectionEvent::GaveUp { attempts: 3 })
    );

    // The 100ms base delay doubles on every retry.
    let gaps: Vec<_> = failed_at.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps, [100, 200, 400].map(Duration::from_millis));

    // The first attempt plus one per reconnect.
    assert_eq!(connector.attempts(), 4);

    let mut state = manager.subscribe();
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
}

#[tokio::test]
async fn close_sends_a_normal_closure_and_is_idempotent() {
    let connector = QueueConnector::default();
    let remote = connector.push();
    connector.push();
    let (mut manager, mut events) =
        ConnectionManager::new(connector.clone(), &config(3), Clock::new());

    manager.connect();
    assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

    manager.close().await;
    manager.close().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(
        events.recv().await,
        Some(ConnectionEvent::Closed {
            code: CloseCode::NORMAL
        })
    );

    let (mut rx, _tx) = remote_channel(remote);
    let mut buf = Vec::new();
    let msg: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert_eq!(msg, Msg::Close(CloseCode::NORMAL));

    // A closed manager stays closed.
    manager.connect();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(connector.attempts(), 1);
    assert!(matches!(
        manager.send(&[1]).await,
        Err(OffloadError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn close_during_backoff_stops_reconnecting() {
    let connector = QueueConnector::default();
    let (mut manager, mut events) =
        ConnectionManager::new(connector.clone(), &config(3), Clock::new());

    manager.connect();
    assert_eq!(
        events.recv().await,
        Some(ConnectionEvent::Closed {
            code: CloseCode::ABNORMAL
        })
    );

    // Sleeping before the first retry.
    manager.close().await;
    time::sleep(Duration::from_secs(10)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn close_is_not_held_up_by_an_abandoned_send() {
    let connector = QueueConnector::default();
    // Kept open but never read.
    let _remote = connector.push();
    let (mut manager, mut events) =
        ConnectionManager::new(connector.clone(), &config(3), Clock::new());

    manager.connect();
    assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

    let frame = vec![0u8; 64 * 1024];
    let res = time::timeout(Duration::from_millis(100), manager.send(&frame)).await;
    assert!(res.is_err());

    time::timeout(Duration::from_secs(3), manager.close())
        .await
        .expect("close must not wait on the stalled peer");

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(
        events.recv().await,
        Some(ConnectionEvent::Closed {
            code: CloseCode::NORMAL
        })
    );
}

#[tokio::test(start_paused = true)]
async fn abandoned_send_reestablishes_the_transport() {
    let connector = QueueConnector::default();
    let _stalled = connector.push();
    let second = connector.push();
    let (mut manager, mut events) =
        ConnectionManager::new(connector.clone(), &config(3), Clock::new());

    manager.connect();
    assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));

    let frame = vec![0u8; 64 * 1024];
    assert!(
        time::timeout(Duration::from_millis(100), manager.send(&frame))
            .await
            .is_err()
    );

    // The half written frame makes the transport unusable.
    assert!(matches!(
        manager.send(&[1]).await,
        Err(OffloadError::NotConnected)
    ));
    assert_eq!(
        events.recv().await,
        Some(ConnectionEvent::Closed {
            code: CloseCode::ABNORMAL
        })
    );
    assert_eq!(events.recv().await, Some(ConnectionEvent::Opened));
    assert_eq!(connector.attempts(), 2);

    manager.send(&[2]).await.unwrap();
    let (mut rx, _tx) = remote_channel(second);
    let mut buf = Vec::new();
    let msg: Msg = rx.recv_into(&mut buf).await.unwrap();
    assert_eq!(msg, Msg::Binary(&[2]));

    manager.close().await;
}

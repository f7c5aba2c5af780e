mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use serde_json::json;

use common::{init_tracing, Harness};
use wsbus::protocol::{FrameCodec, Opcode};
use wsbus::server::{HookEvent, ServerConfig};
use wsbus::{CloseCode, ConnectionId, Error, Frame, Notification, TimeoutReason};

#[tokio::test]
async fn test_hooks_fire_open_then_close_once() {
    init_tracing();
    let harness = Harness::new();
    let events = Arc::new(Mutex::new(Vec::new()));

    for event in [HookEvent::Open, HookEvent::Close] {
        let events = Arc::clone(&events);
        harness.hub.hooks().register(event, move |ctx| {
            events.lock().push((event, ctx.connection_id, ctx.close_code));
            Ok(())
        });
    }

    let (mut client, _auth, task) = harness.connect(1);
    client.send(Frame::close(CloseCode::Clean, "done")).await;
    assert_eq!(client.expect_close().await, Some(CloseCode::Clean));
    assert!(client.recv_timeout().await.is_none());
    task.await.unwrap().unwrap();

    let events = events.lock().clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, HookEvent::Open);
    assert_eq!(events[0].2, None);
    assert_eq!(events[1].0, HookEvent::Close);
    assert_eq!(events[1].1, events[0].1);
    assert_eq!(events[1].2, Some(CloseCode::Clean));
}

#[tokio::test]
async fn test_close_hook_fires_on_abrupt_disconnect() {
    let harness = Harness::new();
    let closes = Arc::new(Mutex::new(Vec::<Option<CloseCode>>::new()));
    {
        let closes = Arc::clone(&closes);
        harness.hub.hooks().register(HookEvent::Close, move |ctx| {
            closes.lock().push(ctx.close_code);
            Ok(())
        });
    }

    let (client, _auth, task) = harness.connect(1);
    drop(client);
    task.await.unwrap().unwrap();

    assert_eq!(*closes.lock(), vec![Some(CloseCode::Abnormal)]);
}

#[tokio::test]
async fn test_registry_drains_to_zero() {
    let harness = Harness::new();
    let mut clients = Vec::new();
    let mut tasks = Vec::new();

    for user in 1..=3 {
        let (client, _auth, task) = harness.connect(user);
        clients.push(client);
        tasks.push(task);
    }

    tokio::time::timeout(Duration::from_secs(1), async {
        while harness.hub.registry().len() != 3 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    drop(clients);
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(harness.hub.registry().is_empty());
    let stats = harness.hub.stats().snapshot();
    assert_eq!(stats.connections_total, 3);
    assert_eq!(stats.connections_active, 0);
    assert_eq!(stats.closes.get(&1006), Some(&3));
}

#[tokio::test]
async fn test_subscribe_then_publish_delivers() {
    let harness = Harness::new();
    let (mut client, _auth, task) = harness.connect(1);

    client.subscribe(&["news"], 0).await;
    harness.wait_for_subscribers(1).await;

    harness.store.send_one("news", "note", json!({"title": "hello"}));
    let frame = client.recv_timeout().await.unwrap();
    let batch: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
    assert_eq!(
        batch,
        json!([{"id": 1, "message": {"type": "note", "payload": {"title": "hello"}}}])
    );

    client.send(Frame::close(CloseCode::Clean, "")).await;
    assert_eq!(client.expect_close().await, Some(CloseCode::Clean));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_subscribe_after_logout_expires_session() {
    let harness = Harness::new();
    let (mut client, auth, task) = harness.connect(1);

    harness.sessions.logout(&auth);
    client.subscribe(&["news"], 0).await;

    assert_eq!(client.expect_close().await, Some(CloseCode::SessionExpired));
    client.finish_close(CloseCode::SessionExpired).await;
    task.await.unwrap().unwrap();

    assert_eq!(harness.hub.dispatcher().subscriber_count().await, 0);
}

#[tokio::test]
async fn test_stale_session_with_malformed_subscription_expires() {
    let harness = Harness::new();
    let (mut client, auth, task) = harness.connect(1);

    harness.sessions.logout(&auth);
    let message = json!({"event_name": "subscribe", "data": {"channels": "news"}});
    client.send(Frame::text(message.to_string())).await;

    assert_eq!(client.expect_close().await, Some(CloseCode::SessionExpired));
    client.finish_close(CloseCode::SessionExpired).await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_subscription_closes_with_incorrect_data() {
    let harness = Harness::new();
    let (mut client, _auth, task) = harness.connect(1);

    let message = json!({"event_name": "subscribe", "data": {"channels": "news"}});
    client.send(Frame::text(message.to_string())).await;

    assert_eq!(client.expect_close().await, Some(CloseCode::IncorrectData));
    client.finish_close(CloseCode::IncorrectData).await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_publish_after_logout_expires_without_delivery() {
    let harness = Harness::new();
    let (mut client, auth, task) = harness.connect(1);

    client.subscribe(&["news"], 0).await;
    harness.wait_for_subscribers(1).await;

    harness.sessions.logout(&auth);
    harness.store.send_one("news", "note", json!("secret"));

    // The close must come first: the notification is never written
    assert_eq!(client.expect_close().await, Some(CloseCode::SessionExpired));
    client.finish_close(CloseCode::SessionExpired).await;
    task.await.unwrap().unwrap();

    assert_eq!(harness.hub.stats().snapshot().session_expirations, 1);
}

#[tokio::test]
async fn test_resubscribe_with_cursor_delivers_only_newer() {
    let harness = Harness::new();
    for n in 1..=3 {
        harness.store.send_one("feed", "t", json!(n));
    }

    let (mut client, _auth, task) = harness.connect(1);
    client.subscribe(&["feed"], 2).await;
    assert_eq!(client.recv_ids().await, vec![3]);

    harness.store.send_one("feed", "t", json!(4));
    assert_eq!(client.recv_ids().await, vec![4]);

    // Frames are handled in order, so the pong means the subscribe was applied
    client.subscribe(&["feed"], 4).await;
    client.send(Frame::ping("sync")).await;
    assert_eq!(client.recv_timeout().await.unwrap().opcode, Opcode::Pong);

    harness.store.send_one("feed", "t", json!(5));
    assert_eq!(client.recv_ids().await, vec![5]);

    client.send(Frame::close(CloseCode::Clean, "")).await;
    assert_eq!(client.expect_close().await, Some(CloseCode::Clean));
    task.await.unwrap().unwrap();

    // Reconnect resuming from the last id seen before the gap
    let (mut client, _auth, task) = harness.connect(2);
    client.subscribe(&["feed"], 3).await;
    assert_eq!(client.recv_ids().await, vec![4, 5]);

    drop(client);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_publish_reaches_only_subscribed_connections() {
    let harness = Harness::new();
    let (mut alice, _a, alice_task) = harness.connect(1);
    let (mut bob, _b, bob_task) = harness.connect(2);

    alice.subscribe(&["a"], 0).await;
    bob.subscribe(&["b"], 0).await;
    harness.wait_for_subscribers(2).await;

    let notification = Arc::new(Notification::new(42, "a", "t", json!(null)));
    let report = harness.hub.dispatcher().publish(notification).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.expired, 0);

    assert_eq!(alice.recv_ids().await, vec![42]);
    assert!(
        tokio::time::timeout(Duration::from_millis(50), bob.recv())
            .await
            .is_err()
    );

    drop(alice);
    drop(bob);
    alice_task.await.unwrap().unwrap();
    bob_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_ping_answered_with_pong() {
    let harness = Harness::new();
    let (mut client, _auth, task) = harness.connect(1);

    client.send(Frame::ping("are you there")).await;
    let pong = client.recv_timeout().await.unwrap();
    assert_eq!(pong.opcode, Opcode::Pong);
    assert_eq!(&pong.payload[..], b"are you there");

    drop(client);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unmasked_frame_is_protocol_error() {
    let harness = Harness::new();
    let (mut client, _auth, task) = harness.connect(1);

    let mut raw = BytesMut::new();
    FrameCodec::server().encode(&Frame::text("{}"), &mut raw);
    client.send_raw(&raw).await;

    assert_eq!(client.expect_close().await, Some(CloseCode::ProtocolError));
    assert!(client.recv_timeout().await.is_none());
    assert!(matches!(task.await.unwrap(), Err(Error::Protocol(_))));
}

#[tokio::test]
async fn test_malformed_json_closes_with_incorrect_data() {
    let harness = Harness::new();
    let (mut client, _auth, task) = harness.connect(1);

    client.send(Frame::text("{not json")).await;

    assert_eq!(client.expect_close().await, Some(CloseCode::IncorrectData));
    client.finish_close(CloseCode::IncorrectData).await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unrecognized_event_is_ignored() {
    let harness = Harness::new();
    let (mut client, _auth, task) = harness.connect(1);

    client
        .send(Frame::text(r#"{"event_name": "update_presence", "data": {}}"#))
        .await;
    client.send(Frame::ping("")).await;
    assert_eq!(client.recv_timeout().await.unwrap().opcode, Opcode::Pong);

    drop(client);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_fragmented_subscribe_message() {
    let harness = Harness::new();
    harness.store.send_one("feed", "t", json!(1));
    let (mut client, _auth, task) = harness.connect(1);

    let message = r#"{"event_name": "subscribe", "data": {"channels": ["feed"], "last": 0}}"#;
    let (head, tail) = message.split_at(20);
    client
        .send(Frame {
            fin: false,
            opcode: Opcode::Text,
            payload: head.as_bytes().to_vec().into(),
        })
        .await;
    client.send(Frame::ping("")).await;
    client
        .send(Frame {
            fin: true,
            opcode: Opcode::Continuation,
            payload: tail.as_bytes().to_vec().into(),
        })
        .await;

    assert_eq!(client.recv_timeout().await.unwrap().opcode, Opcode::Pong);
    assert_eq!(client.recv_ids().await, vec![1]);

    drop(client);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_close_request_from_registry() {
    let harness = Harness::new();
    let (mut client, _auth, task) = harness.connect(1);

    tokio::time::timeout(Duration::from_secs(1), async {
        while harness.hub.registry().get(ConnectionId(1)).is_none() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(harness.hub.registry().close_all(CloseCode::GoingAway), 1);
    assert_eq!(client.expect_close().await, Some(CloseCode::GoingAway));
    client.finish_close(CloseCode::GoingAway).await;
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_no_response_closes_then_terminates() {
    let config = ServerConfig::default()
        .ping_interval(Duration::from_secs(30))
        .timeout(Duration::from_secs(15));
    let harness = Harness::with_config(config);
    let (mut client, _auth, task) = harness.connect(1);

    // Let the connection task start before moving the clock
    tokio::task::yield_now().await;

    tokio::time::advance(Duration::from_secs(31)).await;
    harness.hub.tick();
    let ping = client.recv().await.unwrap();
    assert_eq!(ping.opcode, Opcode::Ping);

    tokio::time::advance(Duration::from_secs(16)).await;
    harness.hub.tick();
    let close = client.recv().await.unwrap();
    assert_eq!(close.close_code(), Some(CloseCode::Timeout));
    assert_eq!(close.close_reason(), Some("no-response"));

    tokio::time::advance(Duration::from_secs(16)).await;
    harness.hub.tick();
    assert!(client.recv().await.is_none());

    assert!(matches!(
        task.await.unwrap(),
        Err(Error::Timeout(TimeoutReason::NoResponse))
    ));
    assert_eq!(harness.hub.stats().snapshot().closes.get(&4002), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_pong_keeps_connection_alive() {
    let config = ServerConfig::default()
        .ping_interval(Duration::from_secs(30))
        .timeout(Duration::from_secs(15));
    let harness = Harness::with_config(config);
    let (mut client, _auth, task) = harness.connect(1);
    tokio::task::yield_now().await;

    for _ in 0..3 {
        tokio::time::advance(Duration::from_secs(31)).await;
        harness.hub.tick();
        let ping = client.recv().await.unwrap();
        assert_eq!(ping.opcode, Opcode::Ping);
        client.send(Frame::pong(ping.payload)).await;

        // Wait for the pong to be handled before moving the clock again
        client.send(Frame::ping("sync")).await;
        assert_eq!(client.recv().await.unwrap().opcode, Opcode::Pong);
    }

    assert_eq!(harness.hub.registry().len(), 1);

    drop(client);
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_closed_by_keep_alive() {
    let config = ServerConfig::default()
        .ping_interval(Duration::from_secs(30))
        .keep_alive_timeout(Duration::from_secs(35))
        .timeout(Duration::from_secs(15));
    let harness = Harness::with_config(config);
    let (mut client, _auth, task) = harness.connect(1);
    tokio::task::yield_now().await;

    tokio::time::advance(Duration::from_secs(31)).await;
    harness.hub.tick();
    assert_eq!(client.recv().await.unwrap().opcode, Opcode::Ping);

    // Pong still pending, but nothing has arrived for longer than keep-alive
    tokio::time::advance(Duration::from_secs(5)).await;
    harness.hub.tick();
    let close = client.recv().await.unwrap();
    assert_eq!(close.close_code(), Some(CloseCode::Timeout));
    assert_eq!(close.close_reason(), Some("keep-alive"));

    client.finish_close(CloseCode::Timeout).await;
    task.await.unwrap().unwrap();
    assert!(harness.hub.registry().is_empty());
}

//! Connection manager behaviour against a fake transport and virtual time.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use civic_core::{AccessTier, BackoffPolicy, ConnectionState};
use civic_sync::{
    ConnectionEvent, ConnectionManager, ConnectionOptions, DataKind, ErrorReporter, EventKind,
    ManualScheduler,
};
use parking_lot::Mutex;
use serde_json::json;
use support::{eventually, Behavior, FakeConnector, ServerEnd};
use tokio::sync::mpsc;

const TARGET: &str = "ws://localhost:8080/ws";

struct Harness {
    manager: ConnectionManager,
    scheduler: Arc<ManualScheduler>,
    connector: Arc<FakeConnector>,
    servers: mpsc::UnboundedReceiver<ServerEnd>,
    reporter: ErrorReporter,
}

fn options() -> ConnectionOptions {
    ConnectionOptions {
        client_id: "test-client".into(),
        backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(4), 0.0),
        heartbeat_interval: Duration::from_secs(30),
        ..Default::default()
    }
}

fn harness(fallback: Behavior, options: ConnectionOptions) -> Harness {
    let scheduler = Arc::new(ManualScheduler::new());
    let (connector, servers) = FakeConnector::new(fallback);
    let reporter = ErrorReporter::default();
    let manager = ConnectionManager::new(
        connector.clone(),
        scheduler.clone(),
        reporter.clone(),
        options,
    )
    .unwrap();

    Harness {
        manager,
        scheduler,
        connector,
        servers,
        reporter,
    }
}

impl Harness {
    async fn accept(&mut self) -> ServerEnd {
        tokio::time::timeout(Duration::from_secs(2), self.servers.recv())
            .await
            .expect("no connection attempt")
            .expect("connector dropped")
    }

    /// Connects and completes auth, returning the server end after the auth message.
    async fn open(&mut self, topics: &[&str], acknowledged: &[&str]) -> ServerEnd {
        let topics = topics.iter().map(|t| t.to_string()).collect();
        self.manager.connect(TARGET, 1, None, topics).unwrap();

        let mut server = self.accept().await;
        let auth = server.next_message().await;
        assert_eq!(auth["type"], "auth");

        server.send(json!({
            "type": "authOk",
            "tier": 1,
            "delayHours": 24,
            "subscriptions": acknowledged,
        }));
        let manager = self.manager.clone();
        eventually("connection open", || manager.is_connected()).await;
        server
    }

    async fn wait_for_state(&self, state: ConnectionState) {
        let manager = self.manager.clone();
        eventually(&format!("state {}", state), || manager.state() == state).await;
    }
}

fn record_kinds(manager: &ConnectionManager, kinds: &[EventKind]) -> Arc<Mutex<Vec<EventKind>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in kinds {
        let seen = seen.clone();
        manager.on(*kind, move |event: &ConnectionEvent| seen.lock().push(event.kind()));
    }
    seen
}

#[tokio::test]
async fn test_auth_ok_opens_with_server_tier_and_delay() {
    let mut h = harness(Behavior::Accept, options());
    let seen = record_kinds(&h.manager, &[EventKind::Open, EventKind::AuthOk]);

    h.manager
        .connect(TARGET, 1, Some("token".into()), vec!["alerts".into()])
        .unwrap();
    assert_eq!(h.manager.state(), ConnectionState::Connecting);

    let mut server = h.accept().await;
    let auth = server.next_message().await;
    assert_eq!(auth["type"], "auth");
    assert_eq!(auth["tier"], 1);
    assert_eq!(auth["clientId"], "test-client");
    assert_eq!(auth["credential"], "token");
    assert_eq!(auth["subscriptions"], json!(["alerts"]));
    h.wait_for_state(ConnectionState::Authenticating).await;

    server.send(json!({"type": "authOk", "tier": 1, "delayHours": 24, "subscriptions": ["alerts"]}));
    h.wait_for_state(ConnectionState::Open).await;

    assert_eq!(h.manager.tier(), AccessTier::Registered);
    assert_eq!(h.manager.delay_hours(), Some(24.0));
    assert_eq!(*seen.lock(), vec![EventKind::AuthOk, EventKind::Open]);
    assert!(server.try_message().is_none());
}

#[tokio::test]
async fn test_backoff_sequence_without_jitter() {
    let h = harness(Behavior::Refuse, options());

    h.manager.connect(TARGET, 0, None, vec![]).unwrap();
    h.wait_for_state(ConnectionState::Reconnecting).await;
    assert_eq!(h.manager.backoff().attempt, 1);
    assert_eq!(h.manager.backoff().last_delay, Some(Duration::from_secs(1)));

    // Nothing fires before the delay is up
    assert_eq!(h.scheduler.advance(Duration::from_millis(999)), 0);
    assert_eq!(h.connector.attempts(), 1);

    let expected = [2, 4, 4, 4];
    let mut delay = Duration::from_secs(1);
    for (i, secs) in expected.iter().enumerate() {
        assert_eq!(h.scheduler.advance(delay), 1);
        let manager = h.manager.clone();
        let attempt = i as u32 + 2;
        eventually("next attempt scheduled", || manager.backoff().attempt == attempt).await;
        delay = Duration::from_secs(*secs);
        assert_eq!(h.manager.backoff().last_delay, Some(delay));
        assert_eq!(h.connector.attempts(), i + 2);
    }

    let failures = h.reporter.errors(&civic_sync::reporter::context([("component", "connection")]));
    assert_eq!(failures.len(), 5);
}

#[tokio::test]
async fn test_jittered_delays_stay_within_bounds() {
    let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(4), 0.25);
    let h = harness(
        Behavior::Refuse,
        ConnectionOptions {
            backoff: policy,
            ..options()
        },
    );

    h.manager.connect(TARGET, 0, None, vec![]).unwrap();
    h.wait_for_state(ConnectionState::Reconnecting).await;

    let mut delays = Vec::new();
    for attempt in 1..=6u32 {
        let manager = h.manager.clone();
        eventually("attempt scheduled", || manager.backoff().attempt == attempt).await;

        let delay = h.manager.backoff().last_delay.unwrap();
        let (low, high) = policy.jitter_bounds(attempt);
        assert!(
            delay >= low && delay <= high,
            "attempt {}: {:?} outside [{:?}, {:?}]",
            attempt,
            delay,
            low,
            high
        );
        delays.push((attempt, delay));

        assert_eq!(h.scheduler.advance(delay), 1);
    }

    assert!(delays
        .iter()
        .any(|(attempt, delay)| *delay != policy.delay_for(*attempt)));
}

#[tokio::test]
async fn test_disconnect_while_reconnecting_cancels_timer() {
    let h = harness(Behavior::Refuse, options());
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();
    h.manager.on(EventKind::Close, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.manager.connect(TARGET, 0, None, vec![]).unwrap();
    h.wait_for_state(ConnectionState::Reconnecting).await;
    assert_eq!(h.scheduler.pending_count(), 1);

    h.manager.disconnect();
    assert_eq!(h.manager.state(), ConnectionState::Closed);
    assert_eq!(h.scheduler.pending_count(), 0);

    assert_eq!(h.scheduler.advance(Duration::from_secs(60)), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.connector.attempts(), 1);
    // One close for the refused attempt; Reconnecting has no transport to close
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_while_connecting_is_noop() {
    let h = harness(Behavior::Hang, options());

    h.manager.connect(TARGET, 0, None, vec![]).unwrap();
    let connector = h.connector.clone();
    eventually("first attempt", || connector.attempts() == 1).await;

    h.manager.connect(TARGET, 2, None, vec![]).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(h.manager.state(), ConnectionState::Connecting);
    assert_eq!(h.manager.tier(), AccessTier::Public);
}

#[tokio::test]
async fn test_connect_while_reconnecting_starts_immediately() {
    let h = harness(Behavior::Refuse, options());
    h.connector.push(Behavior::Refuse);
    h.connector.push(Behavior::Hang);

    h.manager.connect(TARGET, 0, None, vec![]).unwrap();
    h.wait_for_state(ConnectionState::Reconnecting).await;

    h.manager.connect(TARGET, 0, None, vec![]).unwrap();
    assert_eq!(h.scheduler.pending_count(), 0);
    let connector = h.connector.clone();
    eventually("second attempt", || connector.attempts() == 2).await;
}

#[tokio::test]
async fn test_panicking_listener_does_not_block_others() {
    let mut h = harness(Behavior::Accept, options());
    let delivered = Arc::new(Mutex::new(Vec::new()));

    h.manager.on(DataKind::Alert.into(), |_| panic!("listener bug"));
    let sink = delivered.clone();
    h.manager.on(DataKind::Alert.into(), move |event| {
        if let ConnectionEvent::Data { data, .. } = event {
            sink.lock().push(data.clone());
        }
    });

    let server = h.open(&["alerts"], &["alerts"]).await;
    server.send(json!({"type": "alert", "data": {"id": 7, "level": "high"}}));

    let sink = delivered.clone();
    eventually("alert delivered", || sink.lock().len() == 1).await;
    assert_eq!(delivered.lock()[0]["id"], 7);
    assert!(h.manager.is_connected());
}

#[tokio::test]
async fn test_auth_rejection_closes_without_retry() {
    let mut h = harness(Behavior::Accept, options());
    let seen = record_kinds(&h.manager, &[EventKind::Error, EventKind::Close, EventKind::Open]);

    h.manager.connect(TARGET, 2, Some("bad".into()), vec![]).unwrap();
    let mut server = h.accept().await;
    server.next_message().await;
    h.wait_for_state(ConnectionState::Authenticating).await;

    server.send(json!({"type": "error", "message": "invalid credential"}));
    h.wait_for_state(ConnectionState::Closed).await;

    assert_eq!(h.scheduler.pending_count(), 0);
    assert_eq!(h.scheduler.advance(Duration::from_secs(60)), 0);
    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(*seen.lock(), vec![EventKind::Error, EventKind::Close]);

    let auth_errors = h.reporter.errors(&civic_sync::reporter::context([
        ("component", "connection"),
        ("type", "auth"),
    ]));
    assert_eq!(auth_errors.len(), 1);
    assert!(auth_errors[0].message.contains("invalid credential"));
}

#[tokio::test]
async fn test_undecodable_auth_reply_ends_handshake() {
    let mut h = harness(Behavior::Accept, options());
    let seen = record_kinds(&h.manager, &[EventKind::Error, EventKind::Close, EventKind::Open]);

    h.manager.connect(TARGET, 1, None, vec![]).unwrap();
    let mut server = h.accept().await;
    server.next_message().await;
    h.wait_for_state(ConnectionState::Authenticating).await;

    server.send(json!({"type": "authOk", "tier": 5, "delayHours": 0, "subscriptions": []}));
    h.wait_for_state(ConnectionState::Closed).await;

    assert_eq!(h.scheduler.pending_count(), 0);
    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(*seen.lock(), vec![EventKind::Error, EventKind::Close]);

    let protocol_errors = h.reporter.errors(&civic_sync::reporter::context([
        ("component", "connection"),
        ("type", "protocol"),
    ]));
    assert_eq!(protocol_errors.len(), 1);
    let auth_errors = h.reporter.errors(&civic_sync::reporter::context([
        ("component", "connection"),
        ("type", "auth"),
    ]));
    assert_eq!(auth_errors.len(), 1);
}

#[tokio::test]
async fn test_server_error_while_open_keeps_connection() {
    let mut h = harness(Behavior::Accept, options());
    let errors = record_kinds(&h.manager, &[EventKind::Error]);
    let server = h.open(&[], &[]).await;

    server.send(json!({"type": "error", "message": "rate limited"}));
    let seen = errors.clone();
    eventually("error event", || seen.lock().len() == 1).await;
    assert!(h.manager.is_connected());
}

#[tokio::test]
async fn test_subscription_delta_after_auth_and_while_open() {
    let mut h = harness(Behavior::Accept, options());
    let mut server = h.open(&["alerts", "clusters"], &["alerts", "heatmap"]).await;

    let subscribe = server.next_message().await;
    assert_eq!(subscribe["type"], "subscribe");
    assert_eq!(subscribe["subscriptions"], json!(["clusters"]));
    let unsubscribe = server.next_message().await;
    assert_eq!(unsubscribe["type"], "unsubscribe");
    assert_eq!(unsubscribe["subscriptions"], json!(["heatmap"]));

    h.manager
        .subscribe(&["alerts".into(), "sentiment".into()])
        .unwrap();
    let message = server.next_message().await;
    assert_eq!(message["type"], "subscribe");
    assert_eq!(message["subscriptions"], json!(["sentiment"]));

    // Already subscribed: nothing goes out
    h.manager.subscribe(&["alerts".into()]).unwrap();
    assert!(server.try_message().is_none());

    h.manager.unsubscribe(&["clusters".into()]).unwrap();
    let message = server.next_message().await;
    assert_eq!(message["type"], "unsubscribe");
    assert_eq!(message["subscriptions"], json!(["clusters"]));

    assert_eq!(h.manager.subscriptions(), vec!["alerts", "sentiment"]);
}

#[tokio::test]
async fn test_heartbeat_pings_while_open() {
    let mut h = harness(Behavior::Accept, options());
    let mut server = h.open(&[], &[]).await;

    assert_eq!(h.scheduler.advance(Duration::from_secs(29)), 0);
    assert_eq!(h.scheduler.advance(Duration::from_secs(1)), 1);
    assert_eq!(server.next_message().await["type"], "ping");

    server.send(json!({"type": "pong"}));
    h.scheduler.advance(Duration::from_secs(30));
    assert_eq!(server.next_message().await["type"], "ping");
}

#[tokio::test]
async fn test_missing_pong_drops_link_and_reconnects() {
    let mut h = harness(
        Behavior::Accept,
        ConnectionOptions {
            heartbeat_timeout: Some(Duration::from_secs(10)),
            ..options()
        },
    );
    let mut server = h.open(&[], &[]).await;

    h.scheduler.advance(Duration::from_secs(30));
    assert_eq!(server.next_message().await["type"], "ping");

    h.scheduler.advance(Duration::from_secs(10));
    assert_eq!(h.manager.state(), ConnectionState::Reconnecting);
    assert_eq!(h.manager.backoff().attempt, 1);

    h.scheduler.advance(Duration::from_secs(1));
    let mut second = h.accept().await;
    assert_eq!(second.next_message().await["type"], "auth");
    assert_eq!(h.connector.attempts(), 2);
}

#[tokio::test]
async fn test_server_close_reconnects_and_auth_resets_backoff() {
    let mut h = harness(Behavior::Accept, options());
    let server = h.open(&["alerts"], &["alerts"]).await;

    server.close("going away");
    h.wait_for_state(ConnectionState::Reconnecting).await;
    assert_eq!(h.manager.backoff().attempt, 1);

    assert_eq!(h.scheduler.advance(Duration::from_secs(1)), 1);
    let mut second = h.accept().await;
    let auth = second.next_message().await;
    assert_eq!(auth["subscriptions"], json!(["alerts"]));

    second.send(json!({"type": "authOk", "tier": 1, "delayHours": 24, "subscriptions": ["alerts"]}));
    h.wait_for_state(ConnectionState::Open).await;
    assert_eq!(h.manager.backoff().attempt, 0);
    assert_eq!(h.manager.backoff().last_delay, None);

    // The first link's late frames are ignored
    let _ = server.to_client.send(civic_sync::Frame::Text(
        json!({"type": "alert", "data": {}}).to_string(),
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.manager.is_connected());
}

#[tokio::test]
async fn test_max_attempts_gives_up() {
    let h = harness(
        Behavior::Refuse,
        ConnectionOptions {
            max_reconnect_attempts: 2,
            ..options()
        },
    );

    h.manager.connect(TARGET, 0, None, vec![]).unwrap();
    h.wait_for_state(ConnectionState::Reconnecting).await;
    h.scheduler.advance(Duration::from_secs(1));
    let manager = h.manager.clone();
    eventually("second delay", || manager.backoff().attempt == 2).await;
    h.scheduler.advance(Duration::from_secs(2));

    h.wait_for_state(ConnectionState::Closed).await;
    assert_eq!(h.connector.attempts(), 3);
    assert_eq!(h.scheduler.pending_count(), 0);
    assert!(h
        .reporter
        .all()
        .iter()
        .any(|r| r.message.contains("reconnect attempts")));
}

#[tokio::test]
async fn test_unknown_and_malformed_frames_are_tolerated() {
    let mut h = harness(Behavior::Accept, options());
    let server = h.open(&[], &[]).await;

    server.to_client.send(civic_sync::Frame::Text("{not json".into())).unwrap();
    server.send(json!({"type": "futureFeature", "data": 1}));
    server.send(json!({"type": "pipelineStatus", "data": {"stage": "ingest"}}));

    let reporter = h.reporter.clone();
    eventually("malformed frame reported", || !reporter.is_empty()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.manager.is_connected());
    // Unknown types are only reported in debug mode
    assert_eq!(h.reporter.len(), 1);
}

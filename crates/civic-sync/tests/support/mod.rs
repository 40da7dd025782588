//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use civic_sync::{ClientError, ClientResult, Connector, Frame, Link, LoadError, ResourceLoader};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

// =============================================================================
// Fake Connector
// =============================================================================

/// What the next `connect()` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Accept,
    Refuse,
    Hang,
}

/// Server side of an accepted fake link.
pub struct ServerEnd {
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<Frame>,
}

impl ServerEnd {
    /// Next message the client sent, parsed.
    pub async fn next_message(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(2), self.from_client.recv())
            .await
            .expect("timed out waiting for client message")
            .expect("client closed the link");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Message already queued by the client, if any.
    pub fn try_message(&mut self) -> Option<Value> {
        self.from_client
            .try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).expect("client sent invalid JSON"))
    }

    pub fn send(&self, message: Value) {
        self.to_client
            .send(Frame::Text(message.to_string()))
            .expect("client dropped the link");
    }

    pub fn close(&self, reason: &str) {
        let _ = self.to_client.send(Frame::Closed {
            reason: Some(reason.to_string()),
        });
    }
}

pub struct FakeConnector {
    attempts: AtomicUsize,
    script: Mutex<VecDeque<Behavior>>,
    fallback: Behavior,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl FakeConnector {
    /// Connector whose unscripted attempts behave like `fallback`.
    pub fn new(fallback: Behavior) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = FakeConnector {
            attempts: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            fallback,
            servers,
        };
        (Arc::new(connector), rx)
    }

    pub fn push(&self, behavior: Behavior) {
        self.script.lock().push_back(behavior);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &Url) -> ClientResult<Link> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self.script.lock().pop_front().unwrap_or(self.fallback);

        match behavior {
            Behavior::Accept => {
                let (outgoing, from_client) = mpsc::unbounded_channel();
                let (to_client, incoming) = mpsc::unbounded_channel();
                let _ = self.servers.send(ServerEnd {
                    from_client,
                    to_client,
                });
                Ok(Link { outgoing, incoming })
            }
            Behavior::Refuse => Err(ClientError::ConnectionFailed(format!("{} refused", url))),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

// =============================================================================
// Scripted Loader
// =============================================================================

/// Loader that answers from a queue after `latency`, counting calls.
pub struct ScriptedLoader {
    calls: AtomicUsize,
    latency: Duration,
    responses: Mutex<VecDeque<Result<Value, LoadError>>>,
}

impl ScriptedLoader {
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(ScriptedLoader {
            calls: AtomicUsize::new(0),
            latency,
            responses: Mutex::new(VecDeque::new()),
        })
    }

    pub fn ok(&self, value: Value) {
        self.responses.lock().push_back(Ok(value));
    }

    pub fn fail(&self, times: usize) {
        let mut responses = self.responses.lock();
        for _ in 0..times {
            responses.push_back(Err(LoadError::Status {
                status: 503,
                url: "http://test/resource".into(),
            }));
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceLoader for ScriptedLoader {
    async fn load(&self, _source: &str) -> Result<Value, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(LoadError::Other("no scripted response".into())))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Polls `condition` until it holds, yielding to spawned tasks in between.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held: {}", what);
}

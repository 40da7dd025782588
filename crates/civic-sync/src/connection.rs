//! # Connection Manager
//!
//! Keeps the push connection alive: connect, authenticate, heartbeat, and
//! reconnect with exponential backoff after unintentional closures.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  connect() ──► Connecting ──transport up──► send auth ──► Authenticating│
//! │                    ▲                                          │         │
//! │                    │                          authOk          │ error   │
//! │             timer  │                ┌─────────────────────────┤         │
//! │             fired  │                ▼                         ▼         │
//! │             ┌──────┴─────┐   ┌────────────┐             ┌──────────┐   │
//! │             │Reconnecting│◄──│    Open    │             │  Closed  │   │
//! │             └────────────┘   └────────────┘             └──────────┘   │
//! │                    ▲  closure      │ heartbeat every interval   ▲      │
//! │                    └───────────────┘                            │      │
//! │                                                   disconnect() ─┘      │
//! │                                                                         │
//! │  GENERATIONS                                                           │
//! │  ───────────                                                           │
//! │  Every attempt carries a generation number. disconnect(), auth         │
//! │  rejection and closure handling bump it, so frames, closures and       │
//! │  timers belonging to an older attempt are ignored.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All state lives behind one lock and changes only through `transition()`.
//! The lock is never held across an `.await` or while listeners run.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use civic_core::validation::{validate_endpoint, validate_tier, validate_topics};
use civic_core::{AccessTier, BackoffPolicy, BackoffState, ConnectionState, CONTEXT_COMPONENT, CONTEXT_TYPE};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::event_bus::{EventBus, ListenerId};
use crate::protocol::{self, ClientMessage, DataKind, Decoded, ServerMessage};
use crate::reporter::{context, ErrorReporter};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::transport::{Connector, Frame, Link};
use crate::COMPONENT_CONNECTION;

// =============================================================================
// Options
// =============================================================================

/// Connection manager settings.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Sent in every auth message.
    pub client_id: String,

    /// Reconnect delays.
    pub backoff: BackoffPolicy,

    /// Time between pings while open.
    pub heartbeat_interval: Duration,

    /// Drop the link if a ping goes unanswered this long. `None` disables.
    pub heartbeat_timeout: Option<Duration>,

    /// Give up after this many consecutive failed attempts. 0 = never.
    pub max_reconnect_attempts: u32,

    /// Report unknown message types.
    pub debug: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            client_id: Uuid::new_v4().to_string(),
            backoff: BackoffPolicy::default(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: None,
            max_reconnect_attempts: 0,
            debug: false,
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Kinds listeners can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Error,
    AuthOk,
    Data(DataKind),
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Open => write!(f, "open"),
            EventKind::Close => write!(f, "close"),
            EventKind::Error => write!(f, "error"),
            EventKind::AuthOk => write!(f, "authOk"),
            EventKind::Data(kind) => write!(f, "{}", kind),
        }
    }
}

impl From<DataKind> for EventKind {
    fn from(kind: DataKind) -> Self {
        EventKind::Data(kind)
    }
}

/// Payload delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Authenticated; pushes will flow.
    Open,

    /// The transport is gone. `intentional` is true after `disconnect()`.
    Close {
        reason: Option<String>,
        intentional: bool,
    },

    /// Auth rejection or server-side error.
    Error { message: String },

    /// Server accepted the auth message.
    AuthOk {
        tier: AccessTier,
        delay_hours: f64,
        subscriptions: Vec<String>,
    },

    /// A data push.
    Data { kind: DataKind, data: Value },
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Open => EventKind::Open,
            ConnectionEvent::Close { .. } => EventKind::Close,
            ConnectionEvent::Error { .. } => EventKind::Error,
            ConnectionEvent::AuthOk { .. } => EventKind::AuthOk,
            ConnectionEvent::Data { kind, .. } => EventKind::Data(*kind),
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

struct Session {
    state: ConnectionState,
    generation: u64,
    target: Option<Url>,
    tier: AccessTier,
    credential: Option<String>,
    /// What the consumer wants.
    subscriptions: BTreeSet<String>,
    /// What the server last confirmed.
    acknowledged: BTreeSet<String>,
    delay_hours: Option<f64>,
    backoff: BackoffState,
    backoff_delays: ExponentialBackoff,
    reconnect_timer: Option<TimerHandle>,
    heartbeat_timer: Option<TimerHandle>,
    pong_timer: Option<TimerHandle>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
}

impl Session {
    fn new(policy: &BackoffPolicy) -> Self {
        Session {
            state: ConnectionState::Disconnected,
            generation: 0,
            target: None,
            tier: AccessTier::default(),
            credential: None,
            subscriptions: BTreeSet::new(),
            acknowledged: BTreeSet::new(),
            delay_hours: None,
            backoff: BackoffState::default(),
            backoff_delays: exponential_backoff(policy),
            reconnect_timer: None,
            heartbeat_timer: None,
            pong_timer: None,
            outgoing: None,
        }
    }

    fn send(&self, message: &ClientMessage) {
        let Some(outgoing) = &self.outgoing else {
            debug!(msg_type = message.type_name(), "No transport, message dropped");
            return;
        };
        match message.to_json() {
            Ok(json) => {
                debug!(msg_type = message.type_name(), "Sending message");
                if outgoing.send(json).is_err() {
                    debug!(msg_type = message.type_name(), "Transport already closed");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize message"),
        }
    }
}

fn exponential_backoff(policy: &BackoffPolicy) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: policy.base,
        initial_interval: policy.base,
        randomization_factor: policy.jitter,
        multiplier: 2.0,
        max_interval: policy.max,
        max_elapsed_time: None, // No limit on total time
        ..Default::default()
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

struct Inner {
    connector: Arc<dyn Connector>,
    scheduler: Arc<dyn Scheduler>,
    reporter: ErrorReporter,
    options: ConnectionOptions,
    bus: EventBus<EventKind, ConnectionEvent>,
    session: Mutex<Session>,
}

/// Push connection state machine.
///
/// Cheap to clone; clones drive the same connection. Methods that start a
/// session (`connect`) must be called inside a tokio runtime.
///
/// ## Usage
/// ```rust,ignore
/// let manager = ConnectionManager::new(
///     Arc::new(WsConnector::default()),
///     Arc::new(TokioScheduler::new()),
///     reporter.clone(),
///     ConnectionOptions::default(),
/// )?;
///
/// manager.on(DataKind::Alert.into(), |event| println!("{:?}", event));
/// manager.connect("wss://data.example.org/ws", 1, None, vec!["alerts".into()])?;
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client_id", &self.inner.options.client_id)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a manager in the Disconnected state.
    ///
    /// ## Errors
    /// `InvalidConfig` if the backoff policy is unusable or the heartbeat
    /// interval is zero.
    pub fn new(
        connector: Arc<dyn Connector>,
        scheduler: Arc<dyn Scheduler>,
        reporter: ErrorReporter,
        options: ConnectionOptions,
    ) -> ClientResult<Self> {
        options.backoff.validate()?;
        if options.heartbeat_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "heartbeat interval must be greater than 0".into(),
            ));
        }

        Ok(ConnectionManager {
            inner: Arc::new(Inner {
                connector,
                scheduler,
                reporter,
                session: Mutex::new(Session::new(&options.backoff)),
                options,
                bus: EventBus::new(),
            }),
        })
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| ConnectionManager { inner })
    }

    fn transition(session: &mut Session, next: ConnectionState) {
        if session.state != next {
            info!(from = %session.state, to = %next, "Connection state changed");
            session.state = next;
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        self.inner.bus.emit(&event.kind(), &event);
    }

    fn report(&self, error: &ClientError, kind: &str) {
        let endpoint = self
            .inner
            .session
            .lock()
            .target
            .as_ref()
            .map(Url::to_string)
            .unwrap_or_default();
        self.inner.reporter.report(
            error,
            context([
                (CONTEXT_COMPONENT, COMPONENT_CONNECTION),
                (CONTEXT_TYPE, kind),
                ("endpoint", endpoint.as_str()),
            ]),
        );
    }

    // =========================================================================
    // Public Control
    // =========================================================================

    /// Starts connecting to `target`.
    ///
    /// No-op while Connecting, Authenticating or Open. From Reconnecting the
    /// pending timer is cancelled and the attempt starts now.
    ///
    /// ## Errors
    /// `Validation` for a non-ws(s) target, a tier outside 0..=2 or a blank topic.
    pub fn connect(
        &self,
        target: &str,
        tier: i64,
        credential: Option<String>,
        subscriptions: Vec<String>,
    ) -> ClientResult<()> {
        let url = validate_endpoint(target)?;
        let tier = validate_tier(tier)?;
        validate_topics(&subscriptions)?;

        let generation = {
            let mut session = self.inner.session.lock();
            if session.state.is_active() {
                debug!(state = %session.state, "connect() ignored, attempt already active");
                return Ok(());
            }

            if let Some(timer) = session.reconnect_timer.take() {
                self.inner.scheduler.cancel(timer);
            }

            session.target = Some(url.clone());
            session.tier = tier;
            session.credential = credential;
            session.subscriptions = subscriptions.into_iter().collect();
            session.generation += 1;
            Self::transition(&mut session, ConnectionState::Connecting);
            session.generation
        };

        info!(url = %url, tier = %tier, "Connecting");
        self.spawn_session(generation);
        Ok(())
    }

    /// Closes the connection and stops reconnecting until `connect()`.
    ///
    /// Timers are cancelled before this returns.
    pub fn disconnect(&self) {
        let previous = {
            let mut session = self.inner.session.lock();
            session.generation += 1;
            self.cancel_timers(&mut session);
            session.outgoing = None;
            let previous = session.state;
            Self::transition(&mut session, ConnectionState::Closed);
            previous
        };

        info!(from = %previous, "Disconnected");
        if previous.is_active() {
            self.emit(ConnectionEvent::Close {
                reason: None,
                intentional: true,
            });
        }
    }

    /// Adds topics. While open, only the new ones are sent.
    pub fn subscribe(&self, topics: &[String]) -> ClientResult<()> {
        validate_topics(topics)?;
        let mut session = self.inner.session.lock();

        let added: Vec<String> = topics
            .iter()
            .filter(|t| session.subscriptions.insert((*t).clone()))
            .cloned()
            .collect();

        if session.state == ConnectionState::Open && !added.is_empty() {
            session.send(&ClientMessage::Subscribe {
                subscriptions: added.clone(),
            });
            session.acknowledged.extend(added);
        }
        Ok(())
    }

    /// Drops topics. While open, only the ones actually held are sent.
    pub fn unsubscribe(&self, topics: &[String]) -> ClientResult<()> {
        validate_topics(topics)?;
        let mut session = self.inner.session.lock();

        let removed: Vec<String> = topics
            .iter()
            .filter(|t| session.subscriptions.remove(t.as_str()))
            .cloned()
            .collect();

        if session.state == ConnectionState::Open && !removed.is_empty() {
            for topic in &removed {
                session.acknowledged.remove(topic);
            }
            session.send(&ClientMessage::Unsubscribe {
                subscriptions: removed,
            });
        }
        Ok(())
    }

    /// Registers a listener.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.bus.on(kind, handler)
    }

    /// Removes a listener. Returns false if it was not registered for `kind`.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.bus.off(&kind, id)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// The tier confirmed by the server, or the requested one before `authOk`.
    pub fn tier(&self) -> AccessTier {
        self.inner.session.lock().tier
    }

    /// Data delay in hours from the last `authOk`.
    pub fn delay_hours(&self) -> Option<f64> {
        self.inner.session.lock().delay_hours
    }

    /// Desired topics, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.session.lock().subscriptions.iter().cloned().collect()
    }

    pub fn backoff(&self) -> BackoffState {
        self.inner.session.lock().backoff
    }

    pub fn client_id(&self) -> &str {
        &self.inner.options.client_id
    }

    // =========================================================================
    // Session Task
    // =========================================================================

    fn spawn_session(&self, generation: u64) {
        let manager = self.clone();
        tokio::spawn(async move { manager.run_session(generation).await });
    }

    async fn run_session(self, generation: u64) {
        let target = {
            let session = self.inner.session.lock();
            if session.generation != generation {
                return;
            }
            session.target.clone()
        };
        let Some(target) = target else {
            return;
        };

        let link = match self.inner.connector.connect(&target).await {
            Ok(link) => link,
            Err(e) => {
                warn!(url = %target, error = %e, "Connection attempt failed");
                self.handle_closed(generation, Some(e.to_string()), e);
                return;
            }
        };

        let Link {
            outgoing,
            mut incoming,
        } = link;

        {
            let mut session = self.inner.session.lock();
            if session.generation != generation {
                debug!("Attempt superseded before auth, dropping link");
                return;
            }
            session.outgoing = Some(outgoing);
            let auth = ClientMessage::Auth {
                tier: session.tier,
                subscriptions: session.subscriptions.iter().cloned().collect(),
                client_id: self.inner.options.client_id.clone(),
                credential: session.credential.clone(),
            };
            session.send(&auth);
            Self::transition(&mut session, ConnectionState::Authenticating);
        }

        while let Some(frame) = incoming.recv().await {
            match frame {
                Frame::Text(text) => self.handle_text(generation, &text),
                Frame::Closed { reason } => {
                    self.handle_closed(generation, reason, ClientError::Disconnected);
                    return;
                }
            }
        }

        self.handle_closed(generation, None, ClientError::Disconnected);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.session.lock().generation == generation
    }

    // =========================================================================
    // Inbound Dispatch
    // =========================================================================

    fn handle_text(&self, generation: u64, text: &str) {
        if !self.is_current(generation) {
            return;
        }

        match protocol::decode(text) {
            Ok(Decoded::Message(message)) => self.handle_message(generation, message),
            Ok(Decoded::Unknown { kind, .. }) => {
                debug!(kind = %kind, "Unknown message type dropped");
                if self.inner.options.debug {
                    self.inner.reporter.report_message(
                        format!("Unknown message type '{}'", kind),
                        context([
                            (CONTEXT_COMPONENT, COMPONENT_CONNECTION),
                            (CONTEXT_TYPE, "protocol"),
                            ("kind", kind.as_str()),
                        ]),
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "Malformed frame");
                self.report(&e, "protocol");
                // Nothing else can end the handshake, so treat it as a rejection
                let authenticating =
                    self.inner.session.lock().state == ConnectionState::Authenticating;
                if authenticating {
                    self.handle_server_error(generation, format!("Invalid handshake reply: {}", e));
                }
            }
        }
    }

    fn handle_message(&self, generation: u64, message: ServerMessage) {
        match message {
            ServerMessage::AuthOk {
                tier,
                delay_hours,
                subscriptions,
            } => self.handle_auth_ok(generation, tier, delay_hours, subscriptions),

            ServerMessage::Pong => {
                let mut session = self.inner.session.lock();
                if session.generation != generation {
                    return;
                }
                if let Some(timer) = session.pong_timer.take() {
                    self.inner.scheduler.cancel(timer);
                }
                debug!("Received pong");
            }

            ServerMessage::SubscriptionsUpdated { subscriptions } => {
                debug!(count = subscriptions.len(), "Server confirmed subscriptions");
                self.inner.session.lock().acknowledged = subscriptions.into_iter().collect();
            }

            ServerMessage::Error { message } => self.handle_server_error(generation, message),

            data => {
                if let Some((kind, data)) = data.into_data() {
                    debug!(kind = %kind, "Data message");
                    self.emit(ConnectionEvent::Data { kind, data });
                }
            }
        }
    }

    fn handle_auth_ok(
        &self,
        generation: u64,
        tier: AccessTier,
        delay_hours: f64,
        acknowledged: Vec<String>,
    ) {
        {
            let mut session = self.inner.session.lock();
            if session.generation != generation {
                debug!("authOk from superseded link ignored");
                return;
            }
            if session.state != ConnectionState::Authenticating {
                debug!(state = %session.state, "Unexpected authOk ignored");
                return;
            }

            session.tier = tier;
            session.delay_hours = Some(delay_hours);
            session.acknowledged = acknowledged.iter().cloned().collect();
            session.backoff.reset();
            session.backoff_delays.reset();

            self.start_heartbeat(&mut session, generation);

            let to_add: Vec<String> = session
                .subscriptions
                .difference(&session.acknowledged)
                .cloned()
                .collect();
            let to_remove: Vec<String> = session
                .acknowledged
                .difference(&session.subscriptions)
                .cloned()
                .collect();
            if !to_add.is_empty() {
                session.send(&ClientMessage::Subscribe {
                    subscriptions: to_add,
                });
            }
            if !to_remove.is_empty() {
                session.send(&ClientMessage::Unsubscribe {
                    subscriptions: to_remove,
                });
            }
            session.acknowledged = session.subscriptions.clone();

            Self::transition(&mut session, ConnectionState::Open);
        }

        info!(tier = %tier, delay_hours, "Authenticated");
        self.emit(ConnectionEvent::AuthOk {
            tier,
            delay_hours,
            subscriptions: acknowledged,
        });
        self.emit(ConnectionEvent::Open);
    }

    fn handle_server_error(&self, generation: u64, message: String) {
        let rejected = {
            let mut session = self.inner.session.lock();
            if session.generation != generation {
                return;
            }
            if session.state == ConnectionState::Authenticating {
                session.generation += 1;
                self.cancel_timers(&mut session);
                session.outgoing = None;
                Self::transition(&mut session, ConnectionState::Closed);
                true
            } else {
                false
            }
        };

        if rejected {
            warn!(message = %message, "Authentication rejected");
            self.report(&ClientError::AuthRejected(message.clone()), "auth");
            self.emit(ConnectionEvent::Error {
                message: message.clone(),
            });
            self.emit(ConnectionEvent::Close {
                reason: Some(message),
                intentional: false,
            });
        } else {
            warn!(message = %message, "Server error");
            self.report(&ClientError::ServerError(message.clone()), "server");
            self.emit(ConnectionEvent::Error { message });
        }
    }

    // =========================================================================
    // Closure & Reconnect
    // =========================================================================

    fn handle_closed(&self, generation: u64, reason: Option<String>, error: ClientError) {
        let gave_up = {
            let mut session = self.inner.session.lock();
            if session.generation != generation {
                debug!("Closure of superseded attempt ignored");
                return;
            }

            session.generation += 1;
            self.cancel_timers(&mut session);
            session.outgoing = None;

            let attempt = session.backoff.attempt + 1;
            let max = self.inner.options.max_reconnect_attempts;
            if max > 0 && attempt > max {
                Self::transition(&mut session, ConnectionState::Closed);
                Some(session.backoff.attempt)
            } else {
                let delay = self.next_delay(&mut session, attempt);
                session.backoff.record(delay);
                Self::transition(&mut session, ConnectionState::Reconnecting);

                let weak = Arc::downgrade(&self.inner);
                let next_generation = session.generation;
                let timer = self.inner.scheduler.after(
                    delay,
                    Box::new(move || {
                        if let Some(manager) = Self::from_weak(&weak) {
                            manager.fire_reconnect(next_generation);
                        }
                    }),
                );
                session.reconnect_timer = Some(timer);
                info!(attempt, ?delay, "Reconnect scheduled");
                None
            }
        };

        self.report(&error, "transport");
        self.emit(ConnectionEvent::Close {
            reason,
            intentional: false,
        });

        if let Some(attempts) = gave_up {
            let error = ClientError::ReconnectLimit(attempts);
            warn!(attempts, "Giving up on reconnecting");
            self.report(&error, "transport");
            self.emit(ConnectionEvent::Error {
                message: error.to_string(),
            });
        }
    }

    fn next_delay(&self, session: &mut Session, attempt: u32) -> Duration {
        let policy = &self.inner.options.backoff;
        let (low, high) = policy.jitter_bounds(attempt);
        session
            .backoff_delays
            .next_backoff()
            .unwrap_or(policy.max)
            .clamp(low, high)
    }

    fn fire_reconnect(&self, generation: u64) {
        {
            let mut session = self.inner.session.lock();
            if session.generation != generation || session.state != ConnectionState::Reconnecting {
                return;
            }
            session.reconnect_timer = None;
            Self::transition(&mut session, ConnectionState::Connecting);
        }
        self.spawn_session(generation);
    }

    // =========================================================================
    // Heartbeat
    // =========================================================================

    fn start_heartbeat(&self, session: &mut Session, generation: u64) {
        if let Some(timer) = session.heartbeat_timer.take() {
            self.inner.scheduler.cancel(timer);
        }
        let weak = Arc::downgrade(&self.inner);
        let timer = self.inner.scheduler.every(
            self.inner.options.heartbeat_interval,
            Arc::new(move || {
                if let Some(manager) = Self::from_weak(&weak) {
                    manager.send_ping(generation);
                }
            }),
        );
        session.heartbeat_timer = Some(timer);
    }

    fn send_ping(&self, generation: u64) {
        let mut session = self.inner.session.lock();
        if session.generation != generation || session.state != ConnectionState::Open {
            return;
        }

        if let Some(timeout) = self.inner.options.heartbeat_timeout {
            if session.pong_timer.is_none() {
                let weak = Arc::downgrade(&self.inner);
                let timer = self.inner.scheduler.after(
                    timeout,
                    Box::new(move || {
                        if let Some(manager) = Self::from_weak(&weak) {
                            manager.heartbeat_timed_out(generation, timeout);
                        }
                    }),
                );
                session.pong_timer = Some(timer);
            }
        }

        session.send(&ClientMessage::Ping);
    }

    fn heartbeat_timed_out(&self, generation: u64, timeout: Duration) {
        {
            let mut session = self.inner.session.lock();
            if session.generation != generation || session.pong_timer.take().is_none() {
                return;
            }
        }
        warn!(?timeout, "No pong received, dropping link");
        self.handle_closed(
            generation,
            Some("heartbeat timeout".to_string()),
            ClientError::Timeout(timeout.as_secs()),
        );
    }

    fn cancel_timers(&self, session: &mut Session) {
        for timer in [
            session.reconnect_timer.take(),
            session.heartbeat_timer.take(),
            session.pong_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.inner.scheduler.cancel(timer);
        }
    }
}

//! # civic-sync: Client Data Layer for Civic Link
//!
//! Keeps a long-lived push connection alive across an unreliable network,
//! serves pull data through a deduplicating TTL cache, and funnels every
//! failure into one error reporter.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Client Data Layer                                │
//! │                                                                         │
//! │              Dashboard (subscribes to typed events)                     │
//! │                 │                        │                              │
//! │        push     │                        │   pull                       │
//! │                 ▼                        ▼                              │
//! │  ┌────────────────────────┐   ┌────────────────────────┐               │
//! │  │   ConnectionManager    │   │      FetchCache        │               │
//! │  │                        │   │                        │               │
//! │  │ connect → auth → open  │   │ TTL entries            │               │
//! │  │ heartbeat (Scheduler)  │   │ one load per key       │               │
//! │  │ backoff reconnect      │   │ linear retry           │               │
//! │  │ EventBus dispatch      │   │ stale fallback         │               │
//! │  └───────────┬────────────┘   └───────────┬────────────┘               │
//! │              │   unrecoverable failures   │                             │
//! │              └─────────────┬──────────────┘                             │
//! │                            ▼                                            │
//! │               ┌────────────────────────┐                                │
//! │               │     ErrorReporter      │                                │
//! │               │ bounded log + hooks    │──► ErrorPersistence           │
//! │               └────────────────────────┘    (memory / SQLite)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There are no global instances: the application builds each component once
//! and hands out clones (every handle is an `Arc` inside).
//!
//! ## Module Organization
//!
//! - [`connection`] - `ConnectionManager` state machine
//! - [`fetch`] - `FetchCache`
//! - [`reporter`] - `ErrorReporter`
//! - [`persistence`] - Error log storage backends
//! - [`loader`] - Pull resource loaders (HTTP)
//! - [`transport`] - WebSocket connector
//! - [`protocol`] - Push message types
//! - [`scheduler`] - Timer abstraction (tokio and virtual time)
//! - [`event_bus`] - Typed listener registry
//! - [`config`] - Client configuration
//! - [`error`] - Error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod connection;
pub mod error;
pub mod event_bus;
pub mod fetch;
pub mod loader;
pub mod persistence;
pub mod protocol;
pub mod reporter;
pub mod scheduler;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::ClientConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionOptions, EventKind};
pub use error::{ClientError, ClientResult, FetchError};
pub use event_bus::{EventBus, ListenerId};
pub use fetch::{FetchCache, FetchCacheConfig, FetchEvent, FetchOptions, FetchStats};
pub use loader::{HttpLoader, LoadError, ResourceLoader};
pub use persistence::{ErrorPersistence, MemoryPersistence, SqlitePersistence};
pub use protocol::{ClientMessage, DataKind, Decoded, ServerMessage};
pub use reporter::{ErrorReporter, ReporterConfig, ReporterEvent, ReporterStats};
pub use scheduler::{ManualScheduler, Scheduler, TimerHandle, TokioScheduler};
pub use transport::{Connector, Frame, Link, WsConnector};

/// Context value of `component` for connection failures.
pub const COMPONENT_CONNECTION: &str = "connection";

/// Context value of `component` for fetch failures.
pub const COMPONENT_FETCH: &str = "fetch";

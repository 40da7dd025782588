//! # civic-core: Pure Logic for Civic Link
//!
//! The value types and pure functions shared by the client data layer.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Civic Link Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                Dashboard UI (map, charts, filters)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ typed events                           │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   civic-sync: ConnectionManager · FetchCache · ErrorReporter    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ civic-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  backoff  │  │  record   │  │ validation│  │   │
//! │  │   │ ConnState │  │  Policy   │  │ ErrorRec  │  │   tier    │  │   │
//! │  │   │ AccessTier│  │  State    │  │ Context   │  │   url     │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Connection state machine states and access tiers
//! - [`backoff`] - Reconnection delay arithmetic
//! - [`record`] - Error records kept by the reporter
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Duration;
//! use civic_core::backoff::BackoffPolicy;
//!
//! let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 0.0);
//! assert_eq!(policy.delay_for(1), Duration::from_secs(1));
//! assert_eq!(policy.delay_for(4), Duration::from_secs(8));
//! assert_eq!(policy.delay_for(10), Duration::from_secs(30));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backoff;
pub mod error;
pub mod record;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use backoff::{BackoffPolicy, BackoffState};
pub use error::{CoreError, CoreResult, ValidationError};
pub use record::{ErrorContext, ErrorRecord, ErrorSource};
pub use types::{AccessTier, ConnectionState};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Context key naming the component that reported an error.
///
/// The reporter groups its statistics by this key.
pub const CONTEXT_COMPONENT: &str = "component";

/// Context key naming how an error reached the reporter
/// (`"uncaught"`, `"unhandled-async"`, `"protocol"`, ...).
pub const CONTEXT_TYPE: &str = "type";

/// Maximum length of a cache key.
pub const MAX_CACHE_KEY_LEN: usize = 512;

//! # Error Records
//!
//! The entries of the bounded error log.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ErrorRecord                                                            │
//! │  ───────────                                                            │
//! │  id            "7f6c…"  (UUID v4, stable for the record's lifetime)     │
//! │  timestamp     2026-10-16T09:12:44Z                                     │
//! │  message       "Connection failed: connection refused"                  │
//! │  stack_summary "Connection failed ← io error: connection refused"       │
//! │  context       { component: "connection", attempt: "3" }                │
//! │  source        reported | uncaught | unhandled-async                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CONTEXT_COMPONENT;

/// Free-form key/value context attached to a record.
pub type ErrorContext = BTreeMap<String, String>;

// =============================================================================
// Error Source
// =============================================================================

/// How a failure reached the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorSource {
    /// Explicit `report()` call.
    #[default]
    Reported,
    /// Captured by the global panic hook.
    Uncaught,
    /// A monitored background task failed or panicked.
    UnhandledAsync,
}

impl ErrorSource {
    /// Returns the string form used in the `type` context key and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSource::Reported => "reported",
            ErrorSource::Uncaught => "uncaught",
            ErrorSource::UnhandledAsync => "unhandled-async",
        }
    }
}

impl std::fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reported" => Ok(ErrorSource::Reported),
            "uncaught" => Ok(ErrorSource::Uncaught),
            "unhandled-async" => Ok(ErrorSource::UnhandledAsync),
            other => Err(format!("unknown error source '{}'", other)),
        }
    }
}

// =============================================================================
// Error Record
// =============================================================================

/// One captured failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub stack_summary: String,
    #[serde(default)]
    pub context: ErrorContext,
    #[serde(default)]
    pub source: ErrorSource,
}

impl ErrorRecord {
    /// Creates a record stamped with a fresh id and the current time.
    pub fn new(
        message: impl Into<String>,
        stack_summary: impl Into<String>,
        context: ErrorContext,
        source: ErrorSource,
    ) -> Self {
        ErrorRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            message: message.into(),
            stack_summary: stack_summary.into(),
            context,
            source,
        }
    }

    /// Returns the reporting component, if the context names one.
    pub fn component(&self) -> Option<&str> {
        self.context.get(CONTEXT_COMPONENT).map(String::as_str)
    }

    /// Returns true if every filter entry is present in the context with an
    /// identical value. An empty filter matches everything.
    pub fn matches(&self, filter: &ErrorContext) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.context.get(key) == Some(value))
    }
}

/// Builds the one-line cause chain of an error (`outer ← inner ← root`).
///
/// Rust errors carry no stack, so the `source()` chain is the closest
/// equivalent. At most `max_depth` links are included.
pub fn summarize_chain(error: &(dyn std::error::Error + 'static), max_depth: usize) -> String {
    let mut parts = vec![error.to_string()];
    let mut current = error.source();
    while let Some(cause) = current {
        if parts.len() >= max_depth {
            parts.push("…".to_string());
            break;
        }
        parts.push(cause.to_string());
        current = cause.source();
    }
    parts.join(" ← ")
}

//! # Domain Types
//!
//! Connection states and access tiers.
//!
//! ## Connection State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Push Connection States                               │
//! │                                                                         │
//! │  ┌────────────┐   connect()   ┌────────────┐  transport up              │
//! │  │Disconnected│ ────────────► │ Connecting │ ─────────────┐             │
//! │  └────────────┘               └────────────┘              ▼             │
//! │                                     ▲             ┌──────────────┐      │
//! │                          timer fired│             │Authenticating│      │
//! │                                     │             └──────┬───────┘      │
//! │                              ┌──────┴─────┐        authOk│              │
//! │                              │Reconnecting│              ▼              │
//! │                              └────────────┘         ┌────────┐          │
//! │                                     ▲   closure     │  Open  │          │
//! │                                     └────────────── └────────┘          │
//! │                                                                         │
//! │  disconnect() from anywhere, or auth rejected ──► Closed                │
//! │  Closed stays Closed until connect() is called again.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// =============================================================================
// Connection State
// =============================================================================

/// State of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Disconnected,
    /// Transport is being established.
    Connecting,
    /// Transport is up, waiting for `authOk`.
    Authenticating,
    /// Authenticated and receiving pushes.
    Open,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// Intentionally closed, or authentication was rejected.
    Closed,
}

impl ConnectionState {
    /// Returns true while an attempt is in flight or established.
    ///
    /// `connect()` is a no-op in these states.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Authenticating | ConnectionState::Open
        )
    }

    /// Returns true if a transport attempt has been started and not yet torn down.
    pub fn has_transport(&self) -> bool {
        matches!(self, ConnectionState::Authenticating | ConnectionState::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Access Tier
// =============================================================================

/// Access level presented at authentication.
///
/// The server answers with the data delay (in hours) that applies to the
/// tier. Serialized as the bare integer the protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AccessTier {
    /// Anonymous access, longest delay.
    #[default]
    Public = 0,
    /// Signed-in user.
    Registered = 1,
    /// Partner organisation, shortest delay.
    Partner = 2,
}

impl AccessTier {
    /// All tiers in ascending order.
    pub const ALL: [AccessTier; 3] = [AccessTier::Public, AccessTier::Registered, AccessTier::Partner];

    /// Returns the protocol value (0-2).
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for AccessTier {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AccessTier::Public),
            1 => Ok(AccessTier::Registered),
            2 => Ok(AccessTier::Partner),
            _ => Err(ValidationError::OutOfRange {
                field: "tier".to_string(),
                min: 0,
                max: 2,
            }),
        }
    }
}

impl From<AccessTier> for u8 {
    fn from(tier: AccessTier) -> Self {
        tier.as_u8()
    }
}

impl std::fmt::Display for AccessTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessTier::Public => write!(f, "public"),
            AccessTier::Registered => write!(f, "registered"),
            AccessTier::Partner => write!(f, "partner"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_active_states() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Authenticating.is_active());
        assert!(ConnectionState::Open.is_active());
        assert!(!ConnectionState::Reconnecting.is_active());
        assert!(!ConnectionState::Closed.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
    }

    #[test]
    fn test_tier_conversion() {
        assert_eq!(AccessTier::try_from(1).unwrap(), AccessTier::Registered);
        assert_eq!(u8::from(AccessTier::Partner), 2);
        assert!(AccessTier::try_from(3).is_err());
    }

    #[test]
    fn test_tier_serializes_as_integer() {
        let json = serde_json::to_string(&AccessTier::Registered).unwrap();
        assert_eq!(json, "1");

        let parsed: AccessTier = serde_json::from_str("2").unwrap();
        assert_eq!(parsed, AccessTier::Partner);

        assert!(serde_json::from_str::<AccessTier>("7").is_err());
    }
}

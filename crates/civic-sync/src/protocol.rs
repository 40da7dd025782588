//! # Push Protocol Messages
//!
//! JSON messages exchanged with the push endpoint.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Push Protocol Messages                           │
//! │                                                                         │
//! │  HANDSHAKE                                                             │
//! │  ─────────                                                             │
//! │  client ───► auth { tier, subscriptions, clientId, credential? }       │
//! │  server ◄─── authOk { tier, delayHours, subscriptions }                │
//! │         ◄─── error { message }               (rejected: no retry)      │
//! │                                                                         │
//! │  SUBSCRIPTIONS                                                         │
//! │  ─────────────                                                         │
//! │  client ───► subscribe { subscriptions }     (delta only)              │
//! │  client ───► unsubscribe { subscriptions }   (delta only)              │
//! │  server ◄─── subscriptionsUpdated { subscriptions }                    │
//! │                                                                         │
//! │  KEEPALIVE                                                             │
//! │  ─────────                                                             │
//! │  client ───► ping                                                      │
//! │  server ◄─── pong                                                      │
//! │                                                                         │
//! │  DATA (server → client, each { type, data })                           │
//! │  ────                                                                  │
//! │  clusterUpdate · heatmapRefresh · alert · sentimentUpdate ·            │
//! │  pipelineStatus                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Internally tagged JSON: `{ "type": "authOk", "tier": 1, "delayHours": 24, ... }`.
//! Types this client does not know decode to [`Decoded::Unknown`] instead of
//! an error, so the server can add message kinds without breaking old clients.

use civic_core::AccessTier;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, ClientResult};

// =============================================================================
// Client → Server
// =============================================================================

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// First message on every new transport.
    Auth {
        tier: AccessTier,
        subscriptions: Vec<String>,
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
    },

    /// Heartbeat.
    Ping,

    /// Topics to add.
    Subscribe { subscriptions: Vec<String> },

    /// Topics to drop.
    Unsubscribe { subscriptions: Vec<String> },
}

impl ClientMessage {
    /// Returns the wire `type` value.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Auth { .. } => "auth",
            ClientMessage::Ping => "ping",
            ClientMessage::Subscribe { .. } => "subscribe",
            ClientMessage::Unsubscribe { .. } => "unsubscribe",
        }
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> ClientResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// Server → Client
// =============================================================================

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    // =========================================================================
    // Control Messages (handled inside the connection manager)
    // =========================================================================
    /// Authentication accepted. `delay_hours` is authoritative until the next auth.
    AuthOk {
        tier: AccessTier,
        #[serde(rename = "delayHours")]
        delay_hours: f64,
        #[serde(default)]
        subscriptions: Vec<String>,
    },

    /// Heartbeat answer.
    Pong,

    /// Server's view of the subscription set after a change.
    SubscriptionsUpdated {
        #[serde(default)]
        subscriptions: Vec<String>,
    },

    /// Rejection (while authenticating) or server-side failure (while open).
    Error { message: String },

    // =========================================================================
    // Data Messages (forwarded to listeners)
    // =========================================================================
    ClusterUpdate {
        #[serde(default)]
        data: Value,
    },
    HeatmapRefresh {
        #[serde(default)]
        data: Value,
    },
    Alert {
        #[serde(default)]
        data: Value,
    },
    SentimentUpdate {
        #[serde(default)]
        data: Value,
    },
    PipelineStatus {
        #[serde(default)]
        data: Value,
    },
}

impl ServerMessage {
    /// Every `type` value this client understands.
    pub const KNOWN_TYPES: [&'static str; 9] = [
        "authOk",
        "pong",
        "subscriptionsUpdated",
        "error",
        "clusterUpdate",
        "heatmapRefresh",
        "alert",
        "sentimentUpdate",
        "pipelineStatus",
    ];

    /// Returns the wire `type` value.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::AuthOk { .. } => "authOk",
            ServerMessage::Pong => "pong",
            ServerMessage::SubscriptionsUpdated { .. } => "subscriptionsUpdated",
            ServerMessage::Error { .. } => "error",
            ServerMessage::ClusterUpdate { .. } => DataKind::ClusterUpdate.as_str(),
            ServerMessage::HeatmapRefresh { .. } => DataKind::HeatmapRefresh.as_str(),
            ServerMessage::Alert { .. } => DataKind::Alert.as_str(),
            ServerMessage::SentimentUpdate { .. } => DataKind::SentimentUpdate.as_str(),
            ServerMessage::PipelineStatus { .. } => DataKind::PipelineStatus.as_str(),
        }
    }

    /// Splits a data message into its kind and payload.
    ///
    /// Control messages return `None`.
    pub fn into_data(self) -> Option<(DataKind, Value)> {
        match self {
            ServerMessage::ClusterUpdate { data } => Some((DataKind::ClusterUpdate, data)),
            ServerMessage::HeatmapRefresh { data } => Some((DataKind::HeatmapRefresh, data)),
            ServerMessage::Alert { data } => Some((DataKind::Alert, data)),
            ServerMessage::SentimentUpdate { data } => Some((DataKind::SentimentUpdate, data)),
            ServerMessage::PipelineStatus { data } => Some((DataKind::PipelineStatus, data)),
            _ => None,
        }
    }
}

/// Kinds of data pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataKind {
    ClusterUpdate,
    HeatmapRefresh,
    Alert,
    SentimentUpdate,
    PipelineStatus,
}

impl DataKind {
    pub const ALL: [DataKind; 5] = [
        DataKind::ClusterUpdate,
        DataKind::HeatmapRefresh,
        DataKind::Alert,
        DataKind::SentimentUpdate,
        DataKind::PipelineStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::ClusterUpdate => "clusterUpdate",
            DataKind::HeatmapRefresh => "heatmapRefresh",
            DataKind::Alert => "alert",
            DataKind::SentimentUpdate => "sentimentUpdate",
            DataKind::PipelineStatus => "pipelineStatus",
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ClientError::MalformedMessage(format!("unknown data kind '{}'", s)))
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A message this client understands.
    Message(ServerMessage),

    /// Well-formed JSON with a `type` this client does not know.
    Unknown { kind: String, raw: Value },
}

/// Decodes one text frame.
///
/// ## Errors
/// `MalformedMessage` if the frame is not JSON, has no string `type`, or a
/// known type carries the wrong fields.
pub fn decode(text: &str) -> ClientResult<Decoded> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ClientError::MalformedMessage(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::MalformedMessage("missing string field 'type'".into()))?
        .to_string();

    if !ServerMessage::KNOWN_TYPES.contains(&kind.as_str()) {
        return Ok(Decoded::Unknown { kind, raw: value });
    }

    serde_json::from_value(value)
        .map(Decoded::Message)
        .map_err(|e| ClientError::MalformedMessage(format!("{}: {}", kind, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_serialization() {
        let auth = ClientMessage::Auth {
            tier: AccessTier::Registered,
            subscriptions: vec!["alerts".into()],
            client_id: "client-1".into(),
            credential: None,
        };
        let value: Value = serde_json::from_str(&auth.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "auth", "tier": 1, "subscriptions": ["alerts"], "clientId": "client-1"})
        );

        let with_credential = ClientMessage::Auth {
            tier: AccessTier::Partner,
            subscriptions: vec![],
            client_id: "c".into(),
            credential: Some("secret".into()),
        };
        assert!(with_credential.to_json().unwrap().contains("\"credential\":\"secret\""));
    }

    #[test]
    fn test_control_message_shapes() {
        assert_eq!(ClientMessage::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);
        let sub = ClientMessage::Subscribe { subscriptions: vec!["heatmap".into()] };
        assert_eq!(sub.to_json().unwrap(), r#"{"type":"subscribe","subscriptions":["heatmap"]}"#);
        assert_eq!(sub.type_name(), "subscribe");
    }

    #[test]
    fn test_decode_auth_ok() {
        let decoded =
            decode(r#"{"type":"authOk","tier":1,"delayHours":24,"subscriptions":["alerts"]}"#).unwrap();
        assert_eq!(
            decoded,
            Decoded::Message(ServerMessage::AuthOk {
                tier: AccessTier::Registered,
                delay_hours: 24.0,
                subscriptions: vec!["alerts".into()],
            })
        );
    }

    #[test]
    fn test_decode_data_message() {
        let decoded = decode(r#"{"type":"alert","data":{"level":"high"}}"#).unwrap();
        let Decoded::Message(message) = decoded else {
            panic!("expected a known message");
        };
        assert_eq!(message.type_name(), "alert");
        let (kind, data) = message.into_data().unwrap();
        assert_eq!(kind, DataKind::Alert);
        assert_eq!(data["level"], "high");
    }

    #[test]
    fn test_decode_unknown_type() {
        let decoded = decode(r#"{"type":"futureThing","x":1}"#).unwrap();
        assert!(matches!(decoded, Decoded::Unknown { ref kind, .. } if kind == "futureThing"));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode("not json"), Err(ClientError::MalformedMessage(_))));
        assert!(matches!(decode(r#"{"data":{}}"#), Err(ClientError::MalformedMessage(_))));
        // Known type, wrong fields
        assert!(matches!(
            decode(r#"{"type":"authOk","tier":"gold"}"#),
            Err(ClientError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_data_kind_parsing() {
        assert_eq!("heatmapRefresh".parse::<DataKind>().unwrap(), DataKind::HeatmapRefresh);
        assert!("nope".parse::<DataKind>().is_err());
    }
}

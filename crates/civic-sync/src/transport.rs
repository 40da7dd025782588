//! # WebSocket Transport
//!
//! Opens push connections. Reconnection is not handled here: a [`Link`] is
//! one transport lifetime, and the connection manager decides what happens
//! after it closes.
//!
//! ## Link Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ConnectionManager                      pump task (owns the socket)   │
//! │   ─────────────────                      ───────────────────────────   │
//! │   link.outgoing  ── String ──────────►  write half ──► server          │
//! │   link.incoming  ◄── Frame::Text ─────  read half  ◄── server          │
//! │                  ◄── Frame::Closed ───  close frame / error / EOF      │
//! │                                                                         │
//! │   Dropping `outgoing` makes the pump send a close frame and exit.      │
//! │   Exactly one Frame::Closed is sent per link unless the receiver is    │
//! │   already gone.                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ClientError, ClientResult};

// =============================================================================
// Link
// =============================================================================

/// Inbound event on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text message, in receipt order.
    Text(String),

    /// The transport is gone. Always the last frame.
    Closed { reason: Option<String> },
}

/// One established transport.
#[derive(Debug)]
pub struct Link {
    /// Text frames to send. Dropping it closes the transport.
    pub outgoing: mpsc::UnboundedSender<String>,

    /// Frames received from the server.
    pub incoming: mpsc::UnboundedReceiver<Frame>,
}

/// Opens transports to the push endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establishes a transport to `url`.
    ///
    /// ## Errors
    /// Any failure here is treated as an unintentional closure and retried
    /// with backoff.
    async fn connect(&self, url: &Url) -> ClientResult<Link>;
}

// =============================================================================
// WebSocket Connector
// =============================================================================

/// [`Connector`] backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        WsConnector {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        WsConnector { connect_timeout }
    }

    async fn connect_with_timeout(
        &self,
        url: &Url,
    ) -> ClientResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        match timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(ClientError::from(e)),
            Err(_) => Err(ClientError::Timeout(self.connect_timeout.as_secs())),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> ClientResult<Link> {
        let ws_stream = self.connect_with_timeout(url).await?;
        info!(url = %url, "WebSocket connected");

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(ws_stream, outgoing_rx, incoming_tx));

        Ok(Link {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

/// Moves frames between the socket and the link channels until either side ends.
async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
    incoming_tx: mpsc::UnboundedSender<Frame>,
) {
    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                        warn!(error = %e, "WebSocket send failed");
                        break Some(e.to_string());
                    }
                }
                None => {
                    debug!("Link dropped by owner, closing socket");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return;
                }
            },

            incoming = read.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if incoming_tx.send(Frame::Text(text.to_string())).is_err() {
                        debug!("Link receiver dropped, closing socket");
                        let _ = write.send(WsMessage::Close(None)).await;
                        return;
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = write.send(WsMessage::Pong(data)).await {
                        break Some(e.to_string());
                    }
                }
                Some(Ok(WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "Received close frame");
                    break frame.map(|f| f.reason.to_string());
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    warn!("Received unexpected binary message");
                }
                Some(Ok(WsMessage::Frame(_))) => {
                    // Raw frame, ignore
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break Some(e.to_string());
                }
                None => break None,
            },
        }
    };

    let _ = incoming_tx.send(Frame::Closed { reason });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_default_timeout() {
        assert_eq!(WsConnector::default().connect_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_connect_refused_is_retryable() {
        // Port 9 (discard) on localhost is closed in test environments.
        let connector = WsConnector::new(Duration::from_secs(2));
        let url = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let err = connector.connect(&url).await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err:?}");
    }
}

//! One WebSocket connection per task. Every lifecycle change is reported back
//! as a [`TransportEvent`] tagged with the connection id.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use shared::{
    domain::ConnectionId,
    protocol::{ClientRequest, ServerEvent},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::session::TransportEvent;

/// How long a requested close waits for the server's close frame.
pub const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode {kind} request: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("connection {0} is no longer accepting frames")]
    Closed(u64),
}

enum Outbound {
    Frame(String),
    Close,
}

/// Dropping the handle closes the socket the same way [`ConnectionHandle::close`] does.
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn send(&self, request: &ClientRequest) -> Result<(), TransportError> {
        let text = serde_json::to_string(request).map_err(|source| TransportError::Encode {
            kind: request.kind(),
            source,
        })?;
        self.outbound
            .send(Outbound::Frame(text))
            .map_err(|_| TransportError::Closed(self.id.0))
    }

    /// Asks the task to close the socket. The task still reports `Closed`.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Maps `http(s)://` server urls to `ws(s)://` and rejects other schemes.
pub fn websocket_url(server_url: &str) -> Result<String> {
    let server_url = server_url.trim();
    let ws_url = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if server_url.starts_with("ws://") || server_url.starts_with("wss://") {
        server_url.to_string()
    } else {
        return Err(anyhow!(
            "server_url must start with ws://, wss://, http:// or https://"
        ));
    };
    Url::parse(&ws_url).with_context(|| format!("invalid server url: {server_url}"))?;
    Ok(ws_url)
}

pub fn spawn_connection(
    id: ConnectionId,
    url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> ConnectionHandle {
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_connection(id, url, outbound_rx, events));
    ConnectionHandle { id, outbound }
}

async fn run_connection(
    id: ConnectionId,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(err) => {
            warn!(connection_id = id.0, url = %url, "ws: connect failed: {err}");
            let _ = events.send(TransportEvent::Failed(id, err.to_string()));
            let _ = events.send(TransportEvent::Closed(id));
            return;
        }
    };
    info!(connection_id = id.0, url = %url, "ws: connected");
    let _ = events.send(TransportEvent::Opened(id));

    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(Outbound::Frame(text)) => {
                    if let Err(err) = writer.send(Message::Text(text)).await {
                        warn!(connection_id = id.0, "ws: send failed: {err}");
                        let _ = events.send(TransportEvent::Failed(id, err.to_string()));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = writer.send(Message::Close(None)).await;
                    let drained = tokio::time::timeout(CLOSE_ACK_TIMEOUT, async {
                        while let Some(Ok(frame)) = reader.next().await {
                            if frame.is_close() {
                                break;
                            }
                        }
                    })
                    .await;
                    if drained.is_err() {
                        debug!(connection_id = id.0, "ws: close not acknowledged in time");
                    }
                    break;
                }
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decode_server_event(&text) {
                        let _ = events.send(TransportEvent::Received(id, event));
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(connection_id = id.0, "ws: read failed: {err}");
                    let _ = events.send(TransportEvent::Failed(id, err.to_string()));
                    break;
                }
            },
        }
    }

    info!(connection_id = id.0, "ws: closed");
    let _ = events.send(TransportEvent::Closed(id));
}

/// Malformed frames are dropped; unknown tags decode to `ServerEvent::Unknown`.
pub(crate) fn decode_server_event(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!("ws: dropping malformed server frame: {err}");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;

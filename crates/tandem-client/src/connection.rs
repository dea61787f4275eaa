//! Client end of the event channel.

use futures::{SinkExt, StreamExt};
use tandem_shared::constants::WS_PATH;
use tandem_shared::protocol::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::error::{ClientError, Result};

/// Event-channel URL for an HTTP base: `http` becomes `ws`, `https`
/// becomes `wss`, and the socket path is appended.
pub fn ws_url(http_base: &str) -> Result<String> {
    let base = http_base.trim_end_matches('/');
    let rest = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(ClientError::InvalidUrl(http_base.to_string()));
    };
    if rest.ends_with(WS_PATH) {
        Ok(rest)
    } else {
        Ok(format!("{rest}{WS_PATH}"))
    }
}

/// A live event-channel connection. Reading and writing run on their own
/// tasks; dropping the connection closes both.
pub struct Connection {
    outgoing: mpsc::UnboundedSender<ClientEvent>,
    incoming: mpsc::UnboundedReceiver<ServerEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    pub async fn connect(http_base: &str) -> Result<Self> {
        let url = ws_url(http_base)?;
        let (stream, _) = connect_async(url.as_str()).await?;
        let (mut ws_sender, mut ws_receiver) = stream.split();
        tracing::info!(url = %url, "Event channel connected");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerEvent>();

        let writer = tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                match event.to_json() {
                    Ok(json) => {
                        if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize client event");
                    }
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match ServerEvent::from_json(&text) {
                        Ok(event) => {
                            if in_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to parse server event");
                        }
                    },
                    Ok(WsMessage::Close(_)) => {
                        tracing::info!("Server closed the event channel");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Event channel error");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outgoing: out_tx,
            incoming: in_rx,
            reader,
            writer,
        })
    }

    pub fn send(&self, event: ClientEvent) -> Result<()> {
        tracing::debug!(event = event.name(), "Emitting event");
        self.outgoing
            .send(event)
            .map_err(|_| ClientError::Disconnected)
    }

    /// Next event from the server, or `None` once the channel is closed.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.incoming.recv().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, trace, warn};

use parley_types::events::{InboundEvent, OutboundCommand};

use crate::connection::{Connector, Transport};
use crate::dispatcher::StreamClass;

/// Client sends a Ping every 15 seconds to keep intermediaries from idling
/// the socket out.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Opens JSON-over-WebSocket transports at `<base_url>/<stream path>`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, stream: StreamClass) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), stream.path())
    }
}

impl Connector for WsConnector {
    async fn open(&self, stream: StreamClass) -> anyhow::Result<Transport> {
        let url = self.url_for(stream);
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .with_context(|| format!("connecting to {}", url))?;
        info!("{} socket open at {}", stream, url);

        let (mut sink, mut source) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundCommand>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundEvent>();

        tokio::spawn(async move {
            // Forward commands -> socket, with heartbeat
            let mut send_task = tokio::spawn(async move {
                let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
                heartbeat.tick().await;

                loop {
                    tokio::select! {
                        command = outbound_rx.recv() => {
                            let Some(command) = command else { break };
                            let text = match serde_json::to_string(&command) {
                                Ok(text) => text,
                                Err(e) => {
                                    warn!("Failed to encode {}: {}", command.name(), e);
                                    continue;
                                }
                            };
                            trace!("{} frame out: {}", stream, command.name());
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        _ = heartbeat.tick() => {
                            if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = sink.close().await;
            });

            // Read frames -> events
            let mut recv_task = tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            match serde_json::from_str::<InboundEvent>(&text) {
                                Ok(event) => {
                                    if inbound_tx.send(event).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    let raw: String = text.chars().take(200).collect();
                                    warn!("{} bad frame: {} -- raw: {}", stream, e, raw);
                                }
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!("{} socket read error: {}", stream, e);
                            break;
                        }
                    }
                }
            });

            // Wait for either task to finish
            tokio::select! {
                _ = &mut send_task => recv_task.abort(),
                _ = &mut recv_task => send_task.abort(),
            }
            info!("{} socket closed", stream);
        });

        Ok(Transport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_per_stream_class() {
        let connector = WsConnector::new("wss://chat.example/ws/");
        assert_eq!(connector.url_for(StreamClass::Chat), "wss://chat.example/ws/chat");
        assert_eq!(connector.url_for(StreamClass::Media), "wss://chat.example/ws/rtc");
    }
}

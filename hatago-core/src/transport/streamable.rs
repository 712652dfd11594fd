//! Streamable HTTP transport: every hub-to-server frame is an HTTP POST;
//! the response body is either one JSON message or an SSE-framed stream
//! of messages. The server's `mcp-session-id` header is captured on the
//! first exchange and echoed on all subsequent requests.

use eventsource_stream::Eventsource;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::config::header_map;
use super::{StreamableHttpConfig, Transport, TransportEvent};
use crate::error::{HubResult, TransportError};
use crate::messages::JsonRpcMessage;

/// Transport over MCP streamable HTTP.
pub struct StreamableHttpTransport {
    config: StreamableHttpConfig,
    outbound: Option<mpsc::UnboundedSender<JsonRpcMessage>>,
    shutdown: Option<CancellationToken>,
}

impl StreamableHttpTransport {
    /// Create a new streamable HTTP transport from its configuration.
    pub fn new(config: StreamableHttpConfig) -> Self {
        Self {
            config,
            outbound: None,
            shutdown: None,
        }
    }
}

#[async_trait::async_trait]
impl Transport for StreamableHttpTransport {
    async fn start(&mut self) -> HubResult<mpsc::UnboundedReceiver<TransportEvent>> {
        if self.outbound.is_some() {
            return Err(TransportError::closed("streamable-http", "transport already started").into());
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map(&self.config.headers))
            .connect_timeout(self.config.connect_timeout)
            .build()
            .map_err(|e| {
                TransportError::unreachable("streamable-http", format!("http client: {e}"))
            })?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<JsonRpcMessage>();
        let shutdown = CancellationToken::new();

        // One worker both posts and pumps response bodies: exchanges stay
        // FIFO on the wire and the session header is plain local state.
        let url = self.config.url.clone();
        let worker_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut session_id: Option<String> = None;
            loop {
                let message = tokio::select! {
                    message = outbound_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                    _ = worker_shutdown.cancelled() => break,
                };

                let mut request = client
                    .post(url.clone())
                    .header("Accept", "application/json, text/event-stream");
                if let Some(sid) = &session_id {
                    request = request.header("mcp-session-id", sid);
                }

                let response = match request.json(&message).send().await {
                    Ok(response) => response,
                    Err(e) => {
                        error!("mcp POST failed: {e}");
                        break;
                    }
                };

                if let Some(sid) = response
                    .headers()
                    .get("mcp-session-id")
                    .and_then(|v| v.to_str().ok())
                {
                    if session_id.as_deref() != Some(sid) {
                        debug!(session_id = %sid, "upstream session established");
                        session_id = Some(sid.to_string());
                    }
                }

                if !response.status().is_success() {
                    error!("mcp POST returned HTTP {}", response.status());
                    continue;
                }

                let is_event_stream = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.starts_with("text/event-stream"))
                    .unwrap_or(false);

                if is_event_stream {
                    let mut stream = response.bytes_stream().eventsource();
                    loop {
                        let event = tokio::select! {
                            event = stream.next() => event,
                            _ = worker_shutdown.cancelled() => return,
                        };
                        match event {
                            Some(Ok(event)) => {
                                match serde_json::from_str::<JsonRpcMessage>(&event.data) {
                                    Ok(message) => {
                                        if events_tx.send(TransportEvent::Message(message)).is_err() {
                                            return;
                                        }
                                    }
                                    Err(e) => warn!("unparseable frame in response stream: {e}"),
                                }
                            }
                            Some(Err(e)) => {
                                warn!("response stream error: {e}");
                                break;
                            }
                            None => break,
                        }
                    }
                } else {
                    match response.text().await {
                        Ok(body) if body.trim().is_empty() => {}
                        Ok(body) => match serde_json::from_str::<JsonRpcMessage>(body.trim()) {
                            Ok(message) => {
                                if events_tx.send(TransportEvent::Message(message)).is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!("unparseable response body: {e}"),
                        },
                        Err(e) => {
                            error!("failed to read response body: {e}");
                            break;
                        }
                    }
                }
            }
            let _ = events_tx.send(TransportEvent::Closed { exit_code: None });
        });

        self.outbound = Some(outbound_tx);
        self.shutdown = Some(shutdown);
        Ok(events_rx)
    }

    async fn send(&self, message: JsonRpcMessage) -> HubResult<()> {
        let sender = self
            .outbound
            .as_ref()
            .ok_or_else(|| TransportError::closed("streamable-http", "transport not started"))?;
        sender
            .send(message)
            .map_err(|_| TransportError::closed("streamable-http", "worker gone").into())
    }

    async fn close(&mut self) -> HubResult<()> {
        self.outbound = None;
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "streamable-http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> StreamableHttpConfig {
        StreamableHttpConfig {
            url: url.parse().unwrap(),
            headers: Default::default(),
            connect_timeout: std::time::Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let transport = StreamableHttpTransport::new(config("http://localhost:9/mcp"));
        let message = JsonRpcMessage::Notification(
            crate::messages::JsonRpcNotification::without_params("notifications/initialized"),
        );
        assert!(transport.send(message).await.is_err());
    }

    #[tokio::test]
    async fn test_close_ends_event_channel() {
        let mut transport = StreamableHttpTransport::new(config("http://127.0.0.1:1/mcp"));
        let mut events = transport.start().await.unwrap();
        transport.close().await.unwrap();

        match events.recv().await {
            Some(TransportEvent::Closed { .. }) | None => {}
            other => panic!("expected close, got {other:?}"),
        }
    }
}

//! SSE transport: an EventSource-style GET for server-to-hub frames and
//! HTTP POSTs to the server-announced endpoint for hub-to-server frames.

use eventsource_stream::Eventsource;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use super::config::header_map;
use super::{SseConfig, Transport, TransportEvent};
use crate::error::{HubResult, TransportError};
use crate::messages::JsonRpcMessage;

/// Transport over HTTP + Server-Sent Events.
pub struct SseTransport {
    config: SseConfig,
    outbound: Option<mpsc::UnboundedSender<JsonRpcMessage>>,
    shutdown: Option<CancellationToken>,
}

impl SseTransport {
    /// Create a new SSE transport from its configuration.
    pub fn new(config: SseConfig) -> Self {
        Self {
            config,
            outbound: None,
            shutdown: None,
        }
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn start(&mut self) -> HubResult<mpsc::UnboundedReceiver<TransportEvent>> {
        if self.outbound.is_some() {
            return Err(TransportError::closed("sse", "transport already started").into());
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map(&self.config.headers))
            .connect_timeout(self.config.connect_timeout)
            .build()
            .map_err(|e| TransportError::unreachable("sse", format!("http client: {e}")))?;

        debug!(url = %self.config.url, "opening event stream");

        let response = client
            .get(self.config.url.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::unreachable("sse", e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::unreachable(
                "sse",
                format!("event stream returned HTTP {}", response.status()),
            )
            .into());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<JsonRpcMessage>();
        // The server announces where to POST via an `endpoint` event;
        // outbound frames wait until it arrives.
        let (endpoint_tx, endpoint_rx) = watch::channel::<Option<Url>>(None);
        let shutdown = CancellationToken::new();

        let base_url = self.config.url.clone();
        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream().eventsource();
            loop {
                let event = tokio::select! {
                    event = stream.next() => event,
                    _ = reader_shutdown.cancelled() => break,
                };
                let event = match event {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        warn!("event stream error: {e}");
                        break;
                    }
                    None => break,
                };

                match event.event.as_str() {
                    "endpoint" => match base_url.join(event.data.trim()) {
                        Ok(url) => {
                            debug!(endpoint = %url, "message endpoint announced");
                            let _ = endpoint_tx.send(Some(url));
                        }
                        Err(e) => warn!("invalid endpoint event '{}': {e}", event.data),
                    },
                    _ => match serde_json::from_str::<JsonRpcMessage>(&event.data) {
                        Ok(message) => {
                            if events_tx.send(TransportEvent::Message(message)).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("unparseable frame in event stream: {e}"),
                    },
                }
            }
            let _ = events_tx.send(TransportEvent::Closed { exit_code: None });
        });

        let post_client = client.clone();
        tokio::spawn(async move {
            let mut endpoint_rx = endpoint_rx;
            while let Some(message) = outbound_rx.recv().await {
                let endpoint = match endpoint_rx.wait_for(|url| url.is_some()).await {
                    Ok(guard) => match guard.as_ref() {
                        Some(url) => url.clone(),
                        None => break,
                    },
                    Err(_) => break,
                };
                let result = post_client.post(endpoint).json(&message).send().await;
                match result {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        error!("message POST returned HTTP {}", response.status());
                    }
                    Err(e) => {
                        error!("message POST failed: {e}");
                        break;
                    }
                }
            }
            debug!("sse writer finished");
        });

        self.outbound = Some(outbound_tx);
        self.shutdown = Some(shutdown);
        Ok(events_rx)
    }

    async fn send(&self, message: JsonRpcMessage) -> HubResult<()> {
        let sender = self
            .outbound
            .as_ref()
            .ok_or_else(|| TransportError::closed("sse", "transport not started"))?;
        sender
            .send(message)
            .map_err(|_| TransportError::closed("sse", "event stream gone").into())
    }

    async fn close(&mut self) -> HubResult<()> {
        self.outbound = None;
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "sse"
    }
}

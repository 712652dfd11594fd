//! Upstream MCP client.
//!
//! [`UpstreamClient`] wraps a [`Transport`] with MCP semantics: the
//! initialize handshake, request/response correlation over monotonic
//! numeric ids, per-request timeouts, and forwarding of upstream
//! notifications to the hub. One reader task per client drains the
//! transport's event channel in arrival order; responses unblock the
//! matching caller, notifications are handed to the hub's
//! [`NotificationSink`] synchronously (so progress frames observed
//! before a response are delivered before it), and a transport close
//! fails every pending request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{HubError, HubResult, ProtocolError, TransportError};
use crate::messages::{
    Capabilities, CallToolParams, Implementation, InitializeParams, InitializeResult,
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, ProgressToken,
    ProtocolVersion,
};
use crate::transport::{Transport, TransportEvent};

/// Default per-request timeout when the spec does not configure one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration options for an upstream client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for individual requests
    pub request_timeout: Duration,

    /// How the hub identifies itself to the upstream
    pub client_info: Implementation,

    /// Protocol version the hub offers during the handshake
    pub protocol_version: ProtocolVersion,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client_info: Implementation::new("hatago", env!("CARGO_PKG_VERSION")),
            protocol_version: ProtocolVersion::default(),
        }
    }
}

/// What the upstream declared about itself during the handshake.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    /// Server implementation info
    pub implementation: Implementation,
    /// Protocol version the server settled on
    pub protocol_version: ProtocolVersion,
    /// Server capabilities
    pub capabilities: Capabilities,
}

/// Receives upstream notifications on the client's reader task.
///
/// Invoked synchronously, in wire order: a progress notification the
/// upstream emitted before a response is sunk before that response
/// unblocks its caller. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    /// Handle one notification from `upstream_id`.
    fn on_notification(&self, upstream_id: &str, notification: JsonRpcNotification);
}

impl<F> NotificationSink for F
where
    F: Fn(&str, JsonRpcNotification) + Send + Sync,
{
    fn on_notification(&self, upstream_id: &str, notification: JsonRpcNotification) {
        self(upstream_id, notification)
    }
}

/// Everything an upstream exposed at discovery time.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Opaque tool descriptors
    pub tools: Vec<Value>,
    /// Opaque resource descriptors
    pub resources: Vec<Value>,
    /// Opaque resource template descriptors
    pub resource_templates: Vec<Value>,
    /// Opaque prompt descriptors
    pub prompts: Vec<Value>,
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

/// A connected, handshaken MCP client for one upstream.
pub struct UpstreamClient {
    id: String,
    config: ClientConfig,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    transport_kind: &'static str,
    next_id: AtomicI64,
    pending: PendingMap,
    server: RwLock<Option<ServerHandle>>,
}

impl UpstreamClient {
    /// Start the transport, run the MCP handshake, and return a ready
    /// client. Inbound notifications are handed to `sink` tagged with
    /// `id`.
    pub async fn connect(
        id: impl Into<String>,
        mut transport: Box<dyn Transport>,
        config: ClientConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> HubResult<Self> {
        let id = id.into();
        let transport_kind = transport.kind();
        let events = transport.start().await?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        Self::spawn_reader(id.clone(), events, Arc::clone(&pending), sink);

        let client = Self {
            id,
            config,
            transport: tokio::sync::Mutex::new(transport),
            transport_kind,
            next_id: AtomicI64::new(1),
            pending,
            server: RwLock::new(None),
        };

        client.handshake().await?;
        Ok(client)
    }

    fn spawn_reader(
        id: String,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        pending: PendingMap,
        sink: Arc<dyn NotificationSink>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Message(JsonRpcMessage::Response(response)) => {
                        let waiter = response
                            .id
                            .as_number()
                            .and_then(|n| pending.lock().unwrap().remove(&n));
                        match waiter {
                            // A receiver dropped at timeout just discards
                            // the late response here.
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => {
                                warn!(
                                    upstream = %id,
                                    response_id = %response.id,
                                    "dropping response for unknown or expired request"
                                );
                            }
                        }
                    }
                    TransportEvent::Message(JsonRpcMessage::Notification(notification)) => {
                        sink.on_notification(&id, notification);
                    }
                    TransportEvent::Message(JsonRpcMessage::Request(request)) => {
                        warn!(
                            upstream = %id,
                            method = %request.method,
                            "ignoring server-to-client request"
                        );
                    }
                    TransportEvent::Closed { exit_code } => {
                        debug!(upstream = %id, ?exit_code, "transport closed");
                        break;
                    }
                }
            }
            // Dropping the senders fails every in-flight request with a
            // closed-channel error.
            pending.lock().unwrap().clear();
        });
    }

    async fn handshake(&self) -> HubResult<ServerHandle> {
        let params = InitializeParams {
            protocol_version: self.config.protocol_version.clone(),
            capabilities: Capabilities::hub_client(),
            client_info: self.config.client_info.clone(),
        };

        let response = self
            .request("initialize", Some(serde_json::to_value(&params)?), None)
            .await
            .map_err(|e| match e {
                HubError::Transport(_) | HubError::Timeout { .. } => e,
                other => ProtocolError::InitializationFailed {
                    reason: other.to_string(),
                }
                .into(),
            })?;

        let result: InitializeResult = response.result_as()?;
        info!(
            upstream = %self.id,
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "upstream initialized"
        );

        self.notify("notifications/initialized", None).await?;

        let handle = ServerHandle {
            implementation: result.server_info,
            protocol_version: result.protocol_version,
            capabilities: result.capabilities,
        };
        *self.server.write().unwrap() = Some(handle.clone());
        Ok(handle)
    }

    /// The upstream id this client serves.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// What the server declared at handshake time.
    pub fn server(&self) -> Option<ServerHandle> {
        self.server.read().unwrap().clone()
    }

    /// Whether the upstream declared the capability backing `method`.
    pub fn supports(&self, method: &str) -> bool {
        let guard = self.server.read().unwrap();
        let Some(server) = guard.as_ref() else {
            return false;
        };
        let caps = &server.capabilities;
        if method.starts_with("tools/") {
            caps.tools.is_some()
        } else if method.starts_with("resources/") {
            caps.resources.is_some()
        } else if method.starts_with("prompts/") {
            caps.prompts.is_some()
        } else {
            true
        }
    }

    /// Short-circuit with `MethodNotSupported` when the upstream lacks
    /// the capability backing `method`.
    pub fn ensure_supported(&self, method: &str) -> HubResult<()> {
        if self.supports(method) {
            Ok(())
        } else {
            Err(ProtocolError::MethodNotSupported {
                method: method.to_string(),
                upstream: self.id.clone(),
            }
            .into())
        }
    }

    /// Send a request and await its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> HubResult<JsonRpcResponse> {
        self.request_inner(method, params, timeout, None).await
    }

    /// Send a request that can be abandoned through `cancel`.
    pub async fn request_cancellable(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> HubResult<JsonRpcResponse> {
        self.request_inner(method, params, timeout, Some(cancel)).await
    }

    async fn request_inner(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> HubResult<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let request = match params {
            Some(params) => JsonRpcRequest::new(id, method, params),
            None => JsonRpcRequest::without_params(id, method),
        };

        if let Err(e) = self
            .transport
            .lock()
            .await
            .send(JsonRpcMessage::Request(request))
            .await
        {
            self.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        let duration = timeout.unwrap_or(self.config.request_timeout);
        let mut rx = rx;
        tokio::select! {
            response = &mut rx => {
                response.map_err(|_| {
                    TransportError::closed(
                        self.transport_kind,
                        format!("upstream '{}' closed mid-request", self.id),
                    )
                    .into()
                })
            }
            _ = tokio::time::sleep(duration) => {
                // The id is never reused; the reader drops the late
                // response when it eventually arrives.
                self.pending.lock().unwrap().remove(&id);
                Err(HubError::timeout(method, duration))
            }
            _ = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending().await,
                }
            } => {
                self.pending.lock().unwrap().remove(&id);
                Err(HubError::Cancelled)
            }
        }
    }

    /// Send a one-way notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> HubResult<()> {
        let notification = match params {
            Some(params) => JsonRpcNotification::new(method, params),
            None => JsonRpcNotification::without_params(method),
        };
        self.transport
            .lock()
            .await
            .send(JsonRpcMessage::Notification(notification))
            .await
    }

    /// Call a tool by its upstream-local name, threading the progress
    /// token through unchanged.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        progress_token: Option<ProgressToken>,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> HubResult<JsonRpcResponse> {
        self.ensure_supported("tools/call")?;
        let params = CallToolParams::for_upstream(name, arguments, progress_token);
        self.request_inner(
            "tools/call",
            Some(serde_json::to_value(&params)?),
            timeout,
            cancel,
        )
        .await
    }

    /// Enumerate everything the upstream exposes.
    ///
    /// Runs right after the handshake. Capabilities the server did not
    /// declare are skipped entirely; a server that declares a capability
    /// but rejects one of its list methods contributes an empty list.
    pub async fn discover(&self) -> HubResult<Discovery> {
        let mut discovery = Discovery::default();

        if self.supports("tools/list") {
            let result: Option<ListToolsResult> = self.list_or_empty("tools/list").await?;
            discovery.tools = result.map(|r| r.tools).unwrap_or_default();
        }

        if self.supports("resources/list") {
            let result: Option<ListResourcesResult> = self.list_or_empty("resources/list").await?;
            discovery.resources = result.map(|r| r.resources).unwrap_or_default();

            let templates: Option<ListResourceTemplatesResult> =
                self.list_or_empty("resources/templates/list").await?;
            discovery.resource_templates = templates.map(|r| r.resource_templates).unwrap_or_default();
        }

        if self.supports("prompts/list") {
            let result: Option<ListPromptsResult> = self.list_or_empty("prompts/list").await?;
            discovery.prompts = result.map(|r| r.prompts).unwrap_or_default();
        }

        Ok(discovery)
    }

    async fn list_or_empty<T>(&self, method: &str) -> HubResult<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.request(method, None, None).await {
            Ok(response) => match response.result_as::<T>() {
                Ok(result) => Ok(Some(result)),
                Err(HubError::Protocol(ProtocolError::UpstreamError { code, message })) => {
                    warn!(
                        upstream = %self.id,
                        method,
                        code,
                        "discovery call rejected: {message}"
                    );
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            Err(HubError::Protocol(ProtocolError::UpstreamError { code, message })) => {
                warn!(upstream = %self.id, method, code, "discovery call rejected: {message}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the underlying transport.
    pub async fn close(&self) -> HubResult<()> {
        self.transport.lock().await.close().await
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("id", &self.id)
            .field("transport", &self.transport_kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.client_info.name, "hatago");
        assert_eq!(config.protocol_version, ProtocolVersion::V2025_06_18);
    }

    /// In-memory transport answering from a fixed script: initialize and
    /// the list methods get canned results, `slow/never` gets nothing,
    /// and `tools/call` with a progress token emits two progress frames
    /// before the result.
    struct ScriptedTransport {
        inbound: Option<mpsc::UnboundedSender<TransportEvent>>,
        with_prompts: bool,
    }

    impl ScriptedTransport {
        fn new(with_prompts: bool) -> Box<dyn Transport> {
            Box::new(Self {
                inbound: None,
                with_prompts,
            })
        }

        fn push(&self, message: JsonRpcMessage) {
            if let Some(tx) = &self.inbound {
                let _ = tx.send(TransportEvent::Message(message));
            }
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn start(&mut self) -> HubResult<mpsc::UnboundedReceiver<TransportEvent>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.inbound = Some(tx);
            Ok(rx)
        }

        async fn send(&self, message: JsonRpcMessage) -> HubResult<()> {
            let JsonRpcMessage::Request(request) = message else {
                return Ok(());
            };
            let id = request.id.clone();
            match request.method.as_str() {
                "initialize" => {
                    let mut capabilities = json!({ "tools": {}, "resources": {} });
                    if self.with_prompts {
                        capabilities["prompts"] = json!({});
                    }
                    self.push(JsonRpcMessage::Response(JsonRpcResponse::success(
                        id,
                        json!({
                            "protocolVersion": "2025-06-18",
                            "capabilities": capabilities,
                            "serverInfo": { "name": "scripted", "version": "1.0" },
                        }),
                    )));
                }
                "tools/list" => {
                    self.push(JsonRpcMessage::Response(JsonRpcResponse::success(
                        id,
                        json!({ "tools": [{ "name": "echo" }] }),
                    )));
                }
                "resources/list" => {
                    self.push(JsonRpcMessage::Response(JsonRpcResponse::success(
                        id,
                        json!({ "resources": [] }),
                    )));
                }
                "resources/templates/list" => {
                    // Declared the capability but rejects the method.
                    self.push(JsonRpcMessage::Response(JsonRpcResponse::error(
                        id,
                        crate::messages::JsonRpcError::method_not_found(
                            "resources/templates/list",
                        ),
                    )));
                }
                "prompts/list" => {
                    self.push(JsonRpcMessage::Response(JsonRpcResponse::success(
                        id,
                        json!({ "prompts": [] }),
                    )));
                }
                "tools/call" => {
                    let token = request
                        .params
                        .as_ref()
                        .and_then(|p| p.get("_meta"))
                        .and_then(|m| m.get("progressToken"))
                        .cloned();
                    if let Some(token) = token {
                        for progress in [25.0, 75.0] {
                            self.push(JsonRpcMessage::Notification(JsonRpcNotification::new(
                                "notifications/progress",
                                json!({ "progressToken": token, "progress": progress }),
                            )));
                        }
                    }
                    self.push(JsonRpcMessage::Response(JsonRpcResponse::success(
                        id,
                        json!({ "content": [{ "type": "text", "text": "done" }] }),
                    )));
                }
                "slow/never" => {}
                other => {
                    self.push(JsonRpcMessage::Response(JsonRpcResponse::error(
                        id,
                        crate::messages::JsonRpcError::method_not_found(other),
                    )));
                }
            }
            Ok(())
        }

        async fn close(&mut self) -> HubResult<()> {
            if let Some(tx) = self.inbound.take() {
                let _ = tx.send(TransportEvent::Closed { exit_code: None });
            }
            Ok(())
        }

        fn kind(&self) -> &'static str {
            "scripted"
        }
    }

    fn collecting_sink() -> (
        Arc<dyn NotificationSink>,
        Arc<Mutex<Vec<JsonRpcNotification>>>,
    ) {
        let seen: Arc<Mutex<Vec<JsonRpcNotification>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (
            Arc::new(move |_: &str, n: JsonRpcNotification| {
                sink.lock().unwrap().push(n);
            }),
            seen,
        )
    }

    #[tokio::test]
    async fn test_handshake_records_server_info() {
        let (sink, _) = collecting_sink();
        let client = UpstreamClient::connect(
            "s1",
            ScriptedTransport::new(true),
            ClientConfig::default(),
            sink,
        )
        .await
        .unwrap();

        let server = client.server().unwrap();
        assert_eq!(server.implementation.name, "scripted");
        assert!(client.supports("tools/call"));
        assert!(client.supports("prompts/get"));
    }

    #[tokio::test]
    async fn test_capability_gating() {
        let (sink, _) = collecting_sink();
        let client = UpstreamClient::connect(
            "s1",
            ScriptedTransport::new(false),
            ClientConfig::default(),
            sink,
        )
        .await
        .unwrap();

        assert!(!client.supports("prompts/get"));
        let err = client.ensure_supported("prompts/get").unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[tokio::test]
    async fn test_discovery_tolerates_rejected_list_method() {
        let (sink, _) = collecting_sink();
        let client = UpstreamClient::connect(
            "s1",
            ScriptedTransport::new(true),
            ClientConfig::default(),
            sink,
        )
        .await
        .unwrap();

        let discovery = client.discover().await.unwrap();
        assert_eq!(discovery.tools.len(), 1);
        assert!(discovery.resources.is_empty());
        // Rejected with -32601, treated as an empty list.
        assert!(discovery.resource_templates.is_empty());
        assert!(discovery.prompts.is_empty());
    }

    #[tokio::test]
    async fn test_request_timeout_discards_pending() {
        let (sink, _) = collecting_sink();
        let client = UpstreamClient::connect(
            "s1",
            ScriptedTransport::new(true),
            ClientConfig::default(),
            sink,
        )
        .await
        .unwrap();

        let err = client
            .request("slow/never", None, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(client.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_notifications_sunk_before_response() {
        let (sink, seen) = collecting_sink();
        let client = UpstreamClient::connect(
            "s1",
            ScriptedTransport::new(true),
            ClientConfig::default(),
            sink,
        )
        .await
        .unwrap();

        let response = client
            .call_tool(
                "echo",
                Some(json!({})),
                Some(ProgressToken::from("pt-7")),
                None,
                None,
            )
            .await
            .unwrap();
        assert!(response.is_success());

        // Wire order: both progress frames preceded the response, so both
        // hit the sink before call_tool returned.
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].params.as_ref().unwrap()["progress"], 25.0);
        assert_eq!(seen[1].params.as_ref().unwrap()["progress"], 75.0);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let (sink, _) = collecting_sink();
        let client = UpstreamClient::connect(
            "s1",
            ScriptedTransport::new(true),
            ClientConfig::default(),
            sink,
        )
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = client
            .request_cancellable("slow/never", None, Some(Duration::from_secs(5)), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Cancelled));
    }
}

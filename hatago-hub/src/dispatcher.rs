//! JSON-RPC dispatch.
//!
//! The single entry point every downstream adapter calls. Requests fan
//! out over the MCP method table; notifications either feed the
//! cancellation path or are dropped with a debug log. Hub errors are
//! mapped onto JSON-RPC error objects here, in one place.

use std::sync::atomic::Ordering;

use serde_json::{json, Value};
use tracing::{debug, warn};

use hatago_core::error::{HubError, ProtocolError};
use hatago_core::messages::{
    CallToolParams, CancelledParams, GetPromptParams, Implementation, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ReadResourceParams,
};

use crate::hub::Hub;

/// JSON-RPC code for a cancelled request.
const REQUEST_CANCELLED: i64 = -32800;

impl Hub {
    /// Handle one downstream JSON-RPC message.
    ///
    /// Returns `Some` for requests and `None` for notifications (and for
    /// stray responses, which are logged and dropped).
    pub async fn handle_json_rpc_request(
        &self,
        message: JsonRpcMessage,
        session_id: Option<&str>,
    ) -> Option<JsonRpcResponse> {
        match message {
            JsonRpcMessage::Request(request) => {
                Some(self.handle_request(request, session_id).await)
            }
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification, session_id).await;
                None
            }
            JsonRpcMessage::Response(response) => {
                debug!(id = %response.id, "dropping unexpected response from downstream");
                None
            }
        }
    }

    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        session_id: Option<&str>,
    ) -> JsonRpcResponse {
        self.inner.counters.requests.fetch_add(1, Ordering::Relaxed);
        let id = request.id.clone();

        // Any request bearing the session id refreshes its TTL.
        if let Some(session_id) = session_id {
            let _ = self.inner.sessions.get(session_id);
        }

        let result = self.dispatch_request(&request, session_id).await;
        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                self.inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                JsonRpcResponse::error(id, error_to_rpc(&e))
            }
        }
    }

    async fn dispatch_request(
        &self,
        request: &JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<Value, HubError> {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request, session_id).await,
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.inner.tools.descriptors() })),
            "tools/call" => {
                let params: CallToolParams = request.params_as()?;
                let cancel_key = Some(cancel_key(session_id, &request.id.to_string()));
                self.call_tool(session_id, &params, cancel_key).await
            }
            "resources/list" => Ok(json!({ "resources": self.inner.resources.descriptors() })),
            "resources/templates/list" => Ok(json!({
                "resourceTemplates": self.inner.resource_templates.descriptors()
            })),
            "resources/read" => {
                let params: ReadResourceParams = request.params_as()?;
                self.read_resource(&params.uri).await
            }
            "prompts/list" => Ok(json!({ "prompts": self.inner.prompts.descriptors() })),
            "prompts/get" => {
                let params: GetPromptParams = request.params_as()?;
                self.get_prompt(&params.name, params.arguments).await
            }
            "sampling/createMessage" => Err(ProtocolError::MethodNotSupported {
                method: "sampling/createMessage".to_string(),
                upstream: "hatago".to_string(),
            }
            .into()),
            unknown => {
                warn!(method = %unknown, "unknown method");
                Err(HubError::Protocol(ProtocolError::MethodNotSupported {
                    method: unknown.to_string(),
                    upstream: "hatago".to_string(),
                }))
            }
        }
    }

    async fn handle_initialize(
        &self,
        request: &JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<Value, HubError> {
        let params: InitializeParams = request.params_as()?;

        let session = self.inner.sessions.get_or_create(session_id);
        session.set_capabilities(params.capabilities.clone()).await;
        self.inner
            .capabilities
            .set_session(&session.id, params.capabilities);

        // Echo a version the hub can speak; otherwise answer with ours.
        let protocol_version = if params.protocol_version.is_supported() {
            params.protocol_version
        } else {
            Default::default()
        };

        let result = InitializeResult {
            protocol_version,
            capabilities: hatago_core::messages::Capabilities::hub_server(),
            server_info: Implementation::new("hatago", env!("CARGO_PKG_VERSION")),
            instructions: None,
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_notification(&self, notification: JsonRpcNotification, session_id: Option<&str>) {
        match notification.method.as_str() {
            "notifications/initialized" => {}
            "notifications/cancelled" => match notification.params_as::<CancelledParams>() {
                Ok(params) => {
                    let key = cancel_key(session_id, &params.request_id.to_string());
                    if self.cancel_in_flight(&key) {
                        debug!(request = %params.request_id, "cancelled in-flight call");
                    } else {
                        debug!(request = %params.request_id, "nothing in flight to cancel");
                    }
                }
                Err(e) => warn!("malformed cancel notification: {e}"),
            },
            other => {
                debug!(method = %other, "dropping unknown notification");
            }
        }
    }
}

fn cancel_key(session_id: Option<&str>, request_id: &str) -> String {
    format!("{}:{}", session_id.unwrap_or("-"), request_id)
}

/// Map a hub error onto the wire.
///
/// User errors become `-32602`, unsupported methods `-32601`,
/// cancellations `-32800`; upstream JSON-RPC errors keep their code with
/// the message preserved as `data.cause`. Everything else is `-32603`
/// with a descriptive message and no stack traces.
pub(crate) fn error_to_rpc(error: &HubError) -> JsonRpcError {
    match error {
        HubError::Routing(e) => JsonRpcError::invalid_params(e.to_string()),
        HubError::Config(e) => JsonRpcError::invalid_params(e.to_string()),
        HubError::Lifecycle(e) => JsonRpcError::invalid_params(e.to_string()),
        HubError::Serialization { source } => JsonRpcError::invalid_params(source.to_string()),
        HubError::Protocol(ProtocolError::MethodNotSupported { method, .. }) => {
            JsonRpcError::method_not_found(method.clone())
        }
        HubError::Protocol(ProtocolError::UpstreamError { code, message }) => JsonRpcError::new(
            *code,
            message.clone(),
            Some(json!({ "cause": message })),
        ),
        HubError::Cancelled => {
            JsonRpcError::new(REQUEST_CANCELLED, "Request cancelled", None)
        }
        other => JsonRpcError::internal_error(other.to_string()),
    }
}

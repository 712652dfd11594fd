//! MCP message types and JSON-RPC structures.
//!
//! Frame types live in [`core`]; the remaining modules hold the MCP
//! payloads the hub actually decodes. The hub is a relay: tool, resource,
//! and prompt descriptors travel as raw JSON values with only a small
//! parsed header lifted out, so nothing is re-serialized on the hot path.

pub mod core;
pub mod initialization;
pub mod notifications;
pub mod prompts;
pub mod resources;
pub mod tools;

pub use core::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use initialization::{InitializeParams, InitializeResult};
pub use notifications::{CancelledParams, ListChangedParams, ProgressParams};
pub use prompts::{GetPromptParams, ListPromptsResult, PromptHeader};
pub use resources::{
    ListResourceTemplatesResult, ListResourcesResult, ReadResourceParams, ReadResourceResult,
    ResourceHeader,
};
pub use tools::{CallToolParams, ListToolsResult, RequestMeta, ToolHeader};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Protocol versions the hub understands, serialized as their date
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnownVersion {
    /// MCP protocol version 2024-11-05 (legacy)
    #[serde(rename = "2024-11-05")]
    V2024_11_05,

    /// MCP protocol version 2025-03-26
    #[serde(rename = "2025-03-26")]
    V2025_03_26,

    /// MCP protocol version 2025-06-18 (current)
    #[serde(rename = "2025-06-18")]
    V2025_06_18,
}

impl KnownVersion {
    /// The wire form of this version.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V2024_11_05 => "2024-11-05",
            Self::V2025_03_26 => "2025-03-26",
            Self::V2025_06_18 => "2025-06-18",
        }
    }
}

/// MCP protocol version identifier.
///
/// Deserialization tries the known versions first and otherwise keeps
/// the string verbatim, so an unrecognized peer version round-trips
/// instead of failing the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProtocolVersion {
    /// A version the hub knows how to speak
    Known(KnownVersion),

    /// Unrecognized version string, kept for forward compatibility
    Custom(String),
}

impl ProtocolVersion {
    /// MCP protocol version 2024-11-05 (legacy).
    pub const V2024_11_05: Self = Self::Known(KnownVersion::V2024_11_05);
    /// MCP protocol version 2025-03-26.
    pub const V2025_03_26: Self = Self::Known(KnownVersion::V2025_03_26);
    /// MCP protocol version 2025-06-18 (current).
    pub const V2025_06_18: Self = Self::Known(KnownVersion::V2025_06_18);

    /// Get the string representation of the protocol version.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(version) => version.as_str(),
            Self::Custom(version) => version,
        }
    }

    /// Check if this version is one the hub knows how to speak.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V2025_06_18
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capability set declared by either side during initialization.
///
/// The hub only inspects presence of the tools/resources/prompts bits;
/// everything else passes through untouched via `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Capabilities {
    /// Tools capability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,

    /// Resources capability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceCapabilities>,

    /// Prompts capability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptCapabilities>,

    /// Logging capability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,

    /// Sampling capability (client-side)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,

    /// Anything else the peer declared
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Capabilities {
    /// The capability set the hub declares when talking to upstreams:
    /// plain tools/resources/prompts, nothing optional.
    pub fn hub_client() -> Self {
        Self {
            tools: Some(ToolCapabilities::default()),
            resources: Some(ResourceCapabilities::default()),
            prompts: Some(PromptCapabilities::default()),
            ..Default::default()
        }
    }

    /// The capability set the hub advertises to downstream clients.
    pub fn hub_server() -> Self {
        Self {
            tools: Some(ToolCapabilities {
                list_changed: Some(true),
            }),
            resources: Some(ResourceCapabilities {
                subscribe: None,
                list_changed: Some(true),
            }),
            prompts: Some(PromptCapabilities {
                list_changed: Some(true),
            }),
            ..Default::default()
        }
    }
}

/// Tool-related capability flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCapabilities {
    /// Whether list_changed notifications are emitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Resource-related capability flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCapabilities {
    /// Whether resource subscriptions are supported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,

    /// Whether list_changed notifications are emitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Prompt-related capability flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptCapabilities {
    /// Whether list_changed notifications are emitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Implementation information for client or server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Name of the implementation
    pub name: String,

    /// Version of the implementation
    pub version: String,
}

impl Implementation {
    /// Create a new implementation info structure.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Progress token correlating streamed updates with a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    /// String-based progress token
    String(String),
    /// Numeric progress token
    Number(i64),
}

impl From<String> for ProgressToken {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for ProgressToken {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for ProgressToken {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_serialization() {
        let version = ProtocolVersion::V2025_06_18;
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"2025-06-18\"");

        let deserialized: ProtocolVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, version);
    }

    #[test]
    fn test_protocol_version_custom() {
        let custom: ProtocolVersion = serde_json::from_str("\"2099-01-01\"").unwrap();
        assert_eq!(custom, ProtocolVersion::Custom("2099-01-01".to_string()));
        assert!(!custom.is_supported());
    }

    #[test]
    fn test_hub_capabilities() {
        let caps = Capabilities::hub_server();
        assert_eq!(caps.tools.unwrap().list_changed, Some(true));
        assert!(caps.sampling.is_none());

        let client = Capabilities::hub_client();
        assert!(client.tools.is_some());
        assert!(client.resources.is_some());
        assert!(client.prompts.is_some());
    }

    #[test]
    fn test_progress_token_variants() {
        let string_token = ProgressToken::from("pt-1");
        let number_token = ProgressToken::from(42i64);

        assert_eq!(serde_json::to_string(&string_token).unwrap(), "\"pt-1\"");
        assert_eq!(serde_json::to_string(&number_token).unwrap(), "42");
    }
}

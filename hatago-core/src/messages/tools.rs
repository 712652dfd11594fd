//! Tool listing and invocation payloads.
//!
//! Tool descriptors stay opaque [`serde_json::Value`]s; only the header
//! fields the registry needs are parsed out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ProgressToken;

/// The parsed header of a tool descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolHeader {
    /// Tool name as declared by its server
    pub name: String,

    /// Optional human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolHeader {
    /// Parse the header out of an opaque descriptor.
    pub fn from_descriptor(descriptor: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(descriptor.clone())
    }
}

/// Result of `tools/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Opaque tool descriptors
    pub tools: Vec<Value>,

    /// Pagination cursor for the next page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Request metadata carried under `_meta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RequestMeta {
    /// Correlation token for streamed progress updates
    #[serde(rename = "progressToken", skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<ProgressToken>,
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Public tool name
    pub name: String,

    /// Opaque tool arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,

    /// Request metadata (`_meta.progressToken`)
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<RequestMeta>,
}

impl CallToolParams {
    /// Build call params for an upstream, rewriting the tool name and
    /// carrying the progress token through unchanged.
    pub fn for_upstream(
        original_name: impl Into<String>,
        arguments: Option<Value>,
        progress_token: Option<ProgressToken>,
    ) -> Self {
        Self {
            name: original_name.into(),
            arguments,
            meta: progress_token.map(|token| RequestMeta {
                progress_token: Some(token),
            }),
        }
    }

    /// The progress token, if the caller supplied one.
    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.meta.as_ref().and_then(|m| m.progress_token.as_ref())
    }
}

//! Resource listing and reading payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The parsed header of a resource descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHeader {
    /// Resource URI as declared by its server
    pub uri: String,

    /// Optional resource name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Optional human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ResourceHeader {
    /// Parse the header out of an opaque descriptor.
    pub fn from_descriptor(descriptor: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(descriptor.clone())
    }
}

/// Result of `resources/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    /// Opaque resource descriptors
    pub resources: Vec<Value>,

    /// Pagination cursor for the next page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of `resources/templates/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListResourceTemplatesResult {
    /// Opaque resource template descriptors
    pub resource_templates: Vec<Value>,

    /// Pagination cursor for the next page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters of `resources/read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResourceParams {
    /// Public resource URI
    pub uri: String,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReadResourceResult {
    /// Opaque resource contents
    pub contents: Vec<Value>,
}

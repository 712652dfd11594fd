//! Prompt listing and retrieval payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The parsed header of a prompt descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptHeader {
    /// Prompt name as declared by its server
    pub name: String,

    /// Optional human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PromptHeader {
    /// Parse the header out of an opaque descriptor.
    pub fn from_descriptor(descriptor: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(descriptor.clone())
    }
}

/// Result of `prompts/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    /// Opaque prompt descriptors
    pub prompts: Vec<Value>,

    /// Pagination cursor for the next page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters of `prompts/get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPromptParams {
    /// Public prompt name
    pub name: String,

    /// Opaque prompt arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_header_from_descriptor() {
        let descriptor = json!({ "name": "summarize", "arguments": [] });
        let header = PromptHeader::from_descriptor(&descriptor).unwrap();
        assert_eq!(header.name, "summarize");
        assert!(header.description.is_none());
    }
}

//! Initialize handshake payloads.

use serde::{Deserialize, Serialize};

use super::{Capabilities, Implementation, ProtocolVersion};

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version the client wants to speak
    pub protocol_version: ProtocolVersion,

    /// Client capabilities
    pub capabilities: Capabilities,

    /// Client implementation info
    pub client_info: Implementation,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server settled on
    pub protocol_version: ProtocolVersion,

    /// Server capabilities
    pub capabilities: Capabilities,

    /// Server implementation info
    pub server_info: Implementation,

    /// Optional usage instructions for the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

//! Shared helpers for the integration suite.

use serde_json::Value;

use hatago_common::config::{HubConfig, NamingConfig, NamingStrategy, UpstreamSpec};
use hatago_core::messages::{JsonRpcMessage, JsonRpcRequest};
use hatago_hub::{Hub, HubOptions};

/// An upstream spec that spawns the scripted mock server binary with
/// the given `MOCK_*` environment.
pub fn mock_spec(binary: &str, env: &[(&str, &str)]) -> UpstreamSpec {
    let mut spec = UpstreamSpec::local(binary, &[] as &[String]);
    for (key, value) in env {
        spec.env.insert(key.to_string(), value.to_string());
    }
    spec
}

/// A hub with the given naming strategy and tag filter.
pub fn hub_with(strategy: NamingStrategy, separator: &str, tags: &[&str]) -> Hub {
    let options = HubOptions {
        naming: NamingConfig {
            strategy,
            separator: separator.to_string(),
        },
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    };
    Hub::new(options)
}

/// A configuration snapshot from `(id, spec)` pairs.
pub fn config_of(servers: Vec<(&str, UpstreamSpec)>) -> HubConfig {
    let mut config = HubConfig::default();
    for (id, spec) in servers {
        config.mcp_servers.insert(id.to_string(), spec);
    }
    config
}

/// A downstream JSON-RPC request message.
pub fn rpc_request(id: i64, method: &str, params: Value) -> JsonRpcMessage {
    JsonRpcMessage::Request(JsonRpcRequest::new(id, method, params))
}

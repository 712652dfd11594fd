//! Hub-provided tools and resources.
//!
//! A synthetic upstream id `_internal` owns three tools
//! (`hatago_status`, `hatago_list_servers`, `hatago_reload`) and the
//! `hatago://servers` resource. The tools obey the active naming
//! strategy like any external tool; the resource keeps its literal URI.

use serde_json::{json, Value};

use hatago_core::error::{ConfigError, HubResult, RoutingError};
use hatago_common::config::HubConfig;

use crate::hub::Hub;
use crate::registry::RegistryEntry;

/// The synthetic upstream id owning hub-provided tools.
pub const INTERNAL_UPSTREAM_ID: &str = "_internal";

/// The hub's own resource URI.
pub const SERVERS_RESOURCE_URI: &str = "hatago://servers";

fn tool_descriptor(name: &str, description: &str, input_schema: Value) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": input_schema,
    })
}

/// Register the internal toolset and the servers resource.
pub(crate) fn register_internal(hub: &Hub) -> HubResult<()> {
    let router = &hub.inner.router;

    let tools = [
        (
            "hatago_status",
            "Hub status: toolset version, server states, uptime",
            json!({ "type": "object", "properties": {} }),
        ),
        (
            "hatago_list_servers",
            "Summaries of every registered upstream server",
            json!({ "type": "object", "properties": {} }),
        ),
        (
            "hatago_reload",
            "Apply a validated configuration object: diff against the running set and add/remove/re-add servers",
            json!({
                "type": "object",
                "properties": { "config": { "type": "object" } },
                "required": ["config"],
            }),
        ),
    ];

    let entries = tools
        .into_iter()
        .map(|(name, description, schema)| {
            let public_name = router.public_name(INTERNAL_UPSTREAM_ID, name);
            let mut descriptor = tool_descriptor(name, description, schema);
            if let Some(obj) = descriptor.as_object_mut() {
                obj.insert("name".to_string(), Value::String(public_name.clone()));
            }
            RegistryEntry {
                original_name: name.to_string(),
                public_name,
                descriptor,
            }
        })
        .collect();
    hub.inner.tools.register_all(INTERNAL_UPSTREAM_ID, entries)?;

    hub.inner.resources.register_all(
        INTERNAL_UPSTREAM_ID,
        vec![RegistryEntry {
            original_name: SERVERS_RESOURCE_URI.to_string(),
            public_name: SERVERS_RESOURCE_URI.to_string(),
            descriptor: json!({
                "uri": SERVERS_RESOURCE_URI,
                "name": "servers",
                "description": "Registered upstream servers and their registration counts",
                "mimeType": "application/json",
            }),
        }],
    )?;

    Ok(())
}

fn text_result(value: &Value) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
        }]
    })
}

/// Dispatch a call to one of the internal tools.
pub(crate) async fn call_internal_tool(
    hub: &Hub,
    original_name: &str,
    arguments: Option<Value>,
) -> HubResult<Value> {
    match original_name {
        "hatago_status" => Ok(text_result(&status(hub))),
        "hatago_list_servers" => Ok(text_result(&Value::Array(hub.server_summaries()))),
        "hatago_reload" => reload(hub, arguments).await,
        other => Err(RoutingError::UnknownTool {
            name: other.to_string(),
        }
        .into()),
    }
}

fn status(hub: &Hub) -> Value {
    let (revision, hash) = hub.toolset_version();
    let servers: Vec<Value> = hub
        .server_summaries()
        .into_iter()
        .map(|summary| {
            json!({
                "id": summary["id"],
                "status": summary["status"],
                "toolCount": summary["tools"],
            })
        })
        .collect();

    json!({
        "hub_version": env!("CARGO_PKG_VERSION"),
        "toolset": {
            "revision": revision,
            "hash": hash,
            "count": hub.inner.tools.len(),
        },
        "servers": servers,
        "uptimeSec": hub.uptime().as_secs(),
    })
}

async fn reload(hub: &Hub, arguments: Option<Value>) -> HubResult<Value> {
    let config_value = arguments
        .as_ref()
        .and_then(|args| args.get("config"))
        .cloned()
        .ok_or(ConfigError::MissingParameter {
            parameter: "config".to_string(),
        })?;
    let config: HubConfig =
        serde_json::from_value(config_value).map_err(|e| ConfigError::InvalidValue {
            parameter: "config".to_string(),
            reason: e.to_string(),
        })?;
    config.validate()?;

    let current: Vec<String> = hub.server_ids();

    let mut added: Vec<String> = Vec::new();
    let mut removed: Vec<String> = Vec::new();
    let mut changed: Vec<String> = Vec::new();

    for id in &current {
        match config.mcp_servers.get(id) {
            None => removed.push(id.clone()),
            Some(spec) => {
                if hub.server_spec(id).as_ref() != Some(spec) {
                    changed.push(id.clone());
                }
            }
        }
    }
    for id in config.mcp_servers.keys() {
        if !current.contains(id) {
            added.push(id.clone());
        }
    }
    added.sort();
    removed.sort();
    changed.sort();

    // Changed servers are removed and re-added under the new spec.
    for id in removed.iter().chain(changed.iter()) {
        hub.remove_server(id).await?;
    }
    for id in added.iter().chain(changed.iter()) {
        let spec = &config.mcp_servers[id];
        if !spec.matches_tags(hub.tags()) {
            tracing::debug!(upstream = %id, "reload: excluded by tag filter");
            continue;
        }
        if let Err(e) = hub.add_server_with(id, spec.clone(), true).await {
            tracing::warn!(upstream = %id, "reload: failed to add server: {e}");
        }
    }
    hub.notify_tools_changed();

    Ok(text_result(&json!({
        "added": added,
        "removed": removed,
        "changed": changed,
    })))
}

/// Answer a `resources/read` for a `hatago://` URI.
pub(crate) fn read_internal_resource(hub: &Hub, uri: &str) -> HubResult<Value> {
    if uri != SERVERS_RESOURCE_URI {
        return Err(RoutingError::UnknownResource {
            uri: uri.to_string(),
        }
        .into());
    }

    let servers = hub.server_summaries();
    let body = json!({
        "total": servers.len(),
        "servers": servers,
    });

    Ok(json!({
        "contents": [{
            "uri": SERVERS_RESOURCE_URI,
            "mimeType": "application/json",
            "text": serde_json::to_string(&body).unwrap_or_default(),
        }]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubOptions};

    #[tokio::test]
    async fn test_internal_registration_and_status() {
        let hub = Hub::new(HubOptions::default());
        register_internal(&hub).unwrap();

        // Namespace strategy qualifies internal tools like any others.
        let meta = hub.inner.tools.resolve("_internal_hatago_status").unwrap();
        assert_eq!(meta.upstream_id, INTERNAL_UPSTREAM_ID);
        assert_eq!(meta.original_name, "hatago_status");

        let result = call_internal_tool(&hub, "hatago_status", None).await.unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        let status: Value = serde_json::from_str(text).unwrap();
        assert_eq!(status["toolset"]["count"], 3);
        assert!(status["servers"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_servers_resource_empty() {
        let hub = Hub::new(HubOptions::default());
        register_internal(&hub).unwrap();

        let result = read_internal_resource(&hub, SERVERS_RESOURCE_URI).unwrap();
        let text = result["contents"][0]["text"].as_str().unwrap();
        let body: Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["total"], 0);
        assert!(body["servers"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_internal_uri() {
        let hub = Hub::new(HubOptions::default());
        let err = read_internal_resource(&hub, "hatago://nope").unwrap_err();
        assert_eq!(err.category(), "routing");
    }

    #[tokio::test]
    async fn test_reload_requires_config() {
        let hub = Hub::new(HubOptions::default());
        let err = call_internal_tool(&hub, "hatago_reload", Some(json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[tokio::test]
    async fn test_reload_diff_with_empty_sets() {
        let hub = Hub::new(HubOptions::default());
        let result = call_internal_tool(
            &hub,
            "hatago_reload",
            Some(json!({ "config": { "mcpServers": {} } })),
        )
        .await
        .unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        let diff: Value = serde_json::from_str(text).unwrap();
        assert!(diff["added"].as_array().unwrap().is_empty());
        assert!(diff["removed"].as_array().unwrap().is_empty());
        assert!(diff["changed"].as_array().unwrap().is_empty());
    }
}

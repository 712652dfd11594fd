//! Hub configuration model.
//!
//! A configuration file names the upstream servers the hub should
//! aggregate, plus the naming strategy and session settings. JSON, YAML,
//! and TOML are accepted, dispatched on file extension. Loading validates
//! every spec; the hub itself only ever sees validated snapshots.

use hatago_core::error::{ConfigError, HubResult};
use hatago_core::transport::{SseConfig, StdioConfig, StreamableHttpConfig, TransportConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default downstream session TTL.
pub fn default_session_ttl() -> Duration {
    Duration::from_secs(3600)
}

/// Top-level hub configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    /// Upstream servers keyed by id
    #[serde(default)]
    pub mcp_servers: HashMap<String, UpstreamSpec>,

    /// Public naming strategy
    #[serde(default)]
    pub naming: NamingConfig,

    /// Downstream session time-to-live
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub session_ttl: Duration,
}

impl HubConfig {
    /// Load and validate a configuration file, dispatching the parser on
    /// the file extension.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> HubResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::InvalidFormat {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::InvalidFormat {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::InvalidFormat {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            _ => {
                return Err(ConfigError::InvalidFormat {
                    path: path.display().to_string(),
                    reason: "unsupported file format, use .json, .yaml, or .toml".to_string(),
                }
                .into())
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate every upstream spec.
    pub fn validate(&self) -> HubResult<()> {
        for (id, spec) in &self.mcp_servers {
            spec.validate(id)?;
        }
        if self.naming.separator.is_empty() {
            return Err(ConfigError::InvalidValue {
                parameter: "naming.separator".to_string(),
                reason: "separator must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// How public names are derived from `(upstream_id, original_name)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NamingStrategy {
    /// Public name equals the original name
    None,
    /// Public name is `upstream_id + separator + original`
    #[default]
    Namespace,
    /// Alias of `namespace`, kept for config compatibility
    Prefix,
}

impl NamingStrategy {
    /// Whether this strategy qualifies names with the upstream id.
    pub fn qualifies(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Naming configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Active strategy
    #[serde(default)]
    pub strategy: NamingStrategy,

    /// Separator between upstream id and original name
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    "_".to_string()
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            strategy: NamingStrategy::default(),
            separator: default_separator(),
        }
    }
}

/// Per-upstream timeout overrides, all in milliseconds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    /// Per-attempt connect cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_ms: Option<u64>,

    /// Per-request deadline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_ms: Option<u64>,

    /// Keep-alive interval for streaming channels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive_ms: Option<u64>,
}

impl Timeouts {
    /// Connect cap as a duration.
    pub fn connect(&self) -> Option<Duration> {
        self.connect_ms.map(Duration::from_millis)
    }

    /// Request deadline as a duration.
    pub fn request(&self) -> Option<Duration> {
        self.request_ms.map(Duration::from_millis)
    }
}

/// Remote transport flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteTransportType {
    /// Server-Sent Events
    Sse,
    /// Streamable HTTP (`http` accepted as an alias)
    Http,
    /// Streamable HTTP, spelled out
    StreamableHttp,
}

/// One upstream server: either a local command or a remote URL.
///
/// Immutable once added to the hub; `hatago_reload` compares specs for
/// equality to decide what changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSpec {
    /// Local command to spawn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments for the local command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment added on top of the inherited environment
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Working directory for the local command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Remote server URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,

    /// Remote transport flavor; defaults to streamable HTTP
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub transport_type: Option<RemoteTransportType>,

    /// Extra HTTP headers for remote transports
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Timeout overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<Timeouts>,

    /// Whether an external supervisor should re-add this upstream after
    /// a mid-session failure; the hub itself never auto-reconnects
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reconnect: bool,

    /// Supervisor hint: delay before re-adding, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_delay: Option<u64>,

    /// Tags for hub-level filtering
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl UpstreamSpec {
    /// A local command spec.
    pub fn local(command: impl Into<String>, args: &[impl ToString]) -> Self {
        Self {
            command: Some(command.into()),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// A remote spec with the given transport flavor.
    pub fn remote(url: Url, transport_type: RemoteTransportType) -> Self {
        Self {
            url: Some(url),
            transport_type: Some(transport_type),
            ..Default::default()
        }
    }

    /// Add tags to the spec.
    pub fn with_tags(mut self, tags: &[impl ToString]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Validate the spec: exactly one of `command` and `url`.
    pub fn validate(&self, id: &str) -> HubResult<()> {
        match (&self.command, &self.url) {
            (Some(command), None) => {
                if command.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        parameter: format!("mcpServers.{id}.command"),
                        reason: "command must not be empty".to_string(),
                    }
                    .into());
                }
                Ok(())
            }
            (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => Err(ConfigError::InvalidValue {
                parameter: format!("mcpServers.{id}"),
                reason: "specify either command or url, not both".to_string(),
            }
            .into()),
            (None, None) => Err(ConfigError::MissingParameter {
                parameter: format!("mcpServers.{id}.command or .url"),
            }
            .into()),
        }
    }

    /// Whether this upstream passes a hub-level tag filter.
    ///
    /// An empty filter admits everything; a non-empty filter admits only
    /// upstreams with at least one matching tag, so untagged upstreams
    /// are excluded.
    pub fn matches_tags(&self, filter: &[String]) -> bool {
        if filter.is_empty() {
            return true;
        }
        self.tags.iter().any(|tag| filter.contains(tag))
    }

    /// Derive the transport configuration for this spec.
    pub fn transport_config(&self) -> HubResult<TransportConfig> {
        if let Some(command) = &self.command {
            return Ok(TransportConfig::Stdio(StdioConfig {
                command: command.clone(),
                args: self.args.clone(),
                cwd: self.cwd.clone(),
                env: self.env.clone(),
            }));
        }

        let url = self.url.clone().ok_or(ConfigError::MissingParameter {
            parameter: "url".to_string(),
        })?;
        let connect_timeout = self
            .timeouts
            .and_then(|t| t.connect())
            .unwrap_or(Duration::from_secs(30));

        match self.transport_type.unwrap_or(RemoteTransportType::StreamableHttp) {
            RemoteTransportType::Sse => Ok(TransportConfig::Sse(SseConfig {
                url,
                headers: self.headers.clone(),
                connect_timeout,
            })),
            RemoteTransportType::Http | RemoteTransportType::StreamableHttp => {
                Ok(TransportConfig::StreamableHttp(StreamableHttpConfig {
                    url,
                    headers: self.headers.clone(),
                    connect_timeout,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_spec_validation() {
        let local = UpstreamSpec::local("node", &["server.js"]);
        assert!(local.validate("s1").is_ok());

        let empty = UpstreamSpec::default();
        assert!(empty.validate("s1").is_err());

        let both = UpstreamSpec {
            command: Some("node".to_string()),
            url: Some("http://localhost/mcp".parse().unwrap()),
            ..Default::default()
        };
        assert!(both.validate("s1").is_err());
    }

    #[test]
    fn test_tag_filtering() {
        let dev = UpstreamSpec::local("a", &[] as &[String]).with_tags(&["dev"]);
        let prod = UpstreamSpec::local("b", &[] as &[String]).with_tags(&["prod"]);
        let untagged = UpstreamSpec::local("c", &[] as &[String]);

        let filter = vec!["prod".to_string()];
        assert!(!dev.matches_tags(&filter));
        assert!(prod.matches_tags(&filter));
        assert!(!untagged.matches_tags(&filter));

        assert!(untagged.matches_tags(&[]));
    }

    #[test]
    fn test_transport_config_derivation() {
        let local = UpstreamSpec::local("python", &["-m", "server"]);
        assert_eq!(local.transport_config().unwrap().transport_type(), "stdio");

        let sse = UpstreamSpec::remote(
            "http://localhost:3000/sse".parse().unwrap(),
            RemoteTransportType::Sse,
        );
        assert_eq!(sse.transport_config().unwrap().transport_type(), "sse");

        let mut http = UpstreamSpec::remote(
            "http://localhost:3000/mcp".parse().unwrap(),
            RemoteTransportType::Http,
        );
        http.transport_type = None;
        assert_eq!(
            http.transport_config().unwrap().transport_type(),
            "streamable-http"
        );
    }

    #[test]
    fn test_config_json_roundtrip() {
        let raw = serde_json::json!({
            "mcpServers": {
                "s1": { "command": "node", "args": ["server.js"], "tags": ["prod"] },
                "s2": { "url": "http://localhost:3000/mcp", "type": "streamable-http" }
            },
            "naming": { "strategy": "namespace", "separator": "_" }
        });

        let config: HubConfig = serde_json::from_value(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.mcp_servers.len(), 2);
        assert_eq!(config.naming.strategy, NamingStrategy::Namespace);
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_from_file_dispatches_on_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{ "mcpServers": {{ "s1": {{ "command": "cat" }} }} }}"#
        )
        .unwrap();

        let config = HubConfig::from_file(file.path()).unwrap();
        assert!(config.mcp_servers.contains_key("s1"));

        let err = HubConfig::from_file("/nonexistent/hatago.json").unwrap_err();
        assert_eq!(err.category(), "config");
    }
}

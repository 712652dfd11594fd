//! Transport configuration.
//!
//! Each upstream's transport is described by one [`TransportConfig`]
//! variant. Configurations are plain data, validated before a transport
//! is constructed from them.

use crate::error::{ConfigError, HubResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Transport configuration for one upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Child process over stdin/stdout
    Stdio(StdioConfig),

    /// Remote server over Server-Sent Events
    Sse(SseConfig),

    /// Remote server over streamable HTTP
    StreamableHttp(StreamableHttpConfig),
}

impl TransportConfig {
    /// Create a stdio transport configuration.
    pub fn stdio(command: impl Into<String>, args: &[impl ToString]) -> Self {
        Self::Stdio(StdioConfig {
            command: command.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
            env: HashMap::new(),
        })
    }

    /// Create an SSE transport configuration.
    pub fn sse(url: Url) -> Self {
        Self::Sse(SseConfig {
            url,
            headers: HashMap::new(),
            connect_timeout: default_connect_timeout(),
        })
    }

    /// Create a streamable HTTP transport configuration.
    pub fn streamable_http(url: Url) -> Self {
        Self::StreamableHttp(StreamableHttpConfig {
            url,
            headers: HashMap::new(),
            connect_timeout: default_connect_timeout(),
        })
    }

    /// Human-readable transport type name.
    pub fn transport_type(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdio",
            Self::Sse(_) => "sse",
            Self::StreamableHttp(_) => "streamable-http",
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> HubResult<()> {
        match self {
            Self::Stdio(config) => config.validate(),
            Self::Sse(config) => validate_http_url(&config.url),
            Self::StreamableHttp(config) => validate_http_url(&config.url),
        }
    }
}

fn validate_http_url(url: &Url) -> HubResult<()> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidValue {
            parameter: "url".to_string(),
            reason: format!("'{url}' must use http or https"),
        }
        .into());
    }
    Ok(())
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Configuration for the stdio (child process) transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioConfig {
    /// Command to execute
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Environment variables added on top of the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl StdioConfig {
    /// Validate the stdio configuration.
    pub fn validate(&self) -> HubResult<()> {
        if self.command.is_empty() {
            return Err(ConfigError::MissingParameter {
                parameter: "command".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Configuration for the SSE transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseConfig {
    /// Event stream URL
    pub url: Url,

    /// Additional HTTP headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Timeout for establishing the event stream
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

/// Configuration for the streamable HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamableHttpConfig {
    /// MCP endpoint URL
    pub url: Url,

    /// Additional HTTP headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Timeout for individual HTTP exchanges
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

/// Build a reqwest header map out of configured string pairs, skipping
/// pairs that do not form valid header names or values.
pub(crate) fn header_map(headers: &HashMap<String, String>) -> reqwest::header::HeaderMap {
    let mut map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        match (
            key.parse::<reqwest::header::HeaderName>(),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => {
                tracing::warn!(header = %key, "skipping invalid header");
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdio_config_validation() {
        let config = TransportConfig::stdio("node", &["server.js"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.transport_type(), "stdio");

        let empty = TransportConfig::stdio("", &[] as &[String]);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_url_scheme_validation() {
        let config = TransportConfig::sse("http://localhost:3000/sse".parse().unwrap());
        assert!(config.validate().is_ok());

        let bad = TransportConfig::sse("ftp://example.com/sse".parse().unwrap());
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_tagged_serde_format() {
        let config = TransportConfig::stdio("python", &["-m", "server"]);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["type"], "stdio");
        assert_eq!(value["command"], "python");

        let decoded: TransportConfig = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_header_map_skips_invalid() {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer t".to_string());
        headers.insert("bad header".to_string(), "x".to_string());
        let map = header_map(&headers);
        assert_eq!(map.len(), 1);
    }
}

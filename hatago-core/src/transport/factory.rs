//! Transport factory.

use super::{Transport, TransportConfig};
use crate::error::HubResult;

/// Build a transport from its configuration.
///
/// Validates the configuration first, then constructs the matching
/// implementation. The returned transport has not been started.
pub fn create_transport(config: &TransportConfig) -> HubResult<Box<dyn Transport>> {
    config.validate()?;

    match config {
        #[cfg(feature = "stdio")]
        TransportConfig::Stdio(stdio) => Ok(Box::new(super::stdio::StdioTransport::new(
            stdio.clone(),
        ))),

        #[cfg(not(feature = "stdio"))]
        TransportConfig::Stdio(_) => Err(crate::error::ConfigError::InvalidValue {
            parameter: "type".to_string(),
            reason: "stdio transport support not compiled in".to_string(),
        }
        .into()),

        #[cfg(feature = "sse")]
        TransportConfig::Sse(sse) => Ok(Box::new(super::sse::SseTransport::new(sse.clone()))),

        #[cfg(not(feature = "sse"))]
        TransportConfig::Sse(_) => Err(crate::error::ConfigError::InvalidValue {
            parameter: "type".to_string(),
            reason: "sse transport support not compiled in".to_string(),
        }
        .into()),

        #[cfg(feature = "streamable-http")]
        TransportConfig::StreamableHttp(http) => Ok(Box::new(
            super::streamable::StreamableHttpTransport::new(http.clone()),
        )),

        #[cfg(not(feature = "streamable-http"))]
        TransportConfig::StreamableHttp(_) => Err(crate::error::ConfigError::InvalidValue {
            parameter: "type".to_string(),
            reason: "streamable-http transport support not compiled in".to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_stdio_transport() {
        let config = TransportConfig::stdio("echo", &["hello"]);
        let transport = create_transport(&config).unwrap();
        assert_eq!(transport.kind(), "stdio");
    }

    #[test]
    fn test_create_remote_transports() {
        let sse = TransportConfig::sse("http://localhost:3000/sse".parse().unwrap());
        assert_eq!(create_transport(&sse).unwrap().kind(), "sse");

        let http = TransportConfig::streamable_http("http://localhost:3000/mcp".parse().unwrap());
        assert_eq!(create_transport(&http).unwrap().kind(), "streamable-http");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TransportConfig::stdio("", &[] as &[String]);
        assert!(create_transport(&config).is_err());
    }
}

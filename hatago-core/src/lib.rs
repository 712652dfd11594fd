//! # Hatago core
//!
//! Foundational pieces of the Hatago MCP hub: the JSON-RPC/MCP message
//! model, the error taxonomy, the three upstream transports (stdio
//! process, SSE, streamable HTTP), the upstream client, and the
//! connect-with-retry helper.
//!
//! The hub itself (registries, routing, sessions, notification fan-out,
//! the dispatcher) lives in `hatago-hub` and is built entirely on the
//! types in this crate.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hatago_core::client::{ClientConfig, NotificationSink, UpstreamClient};
//! use hatago_core::messages::JsonRpcNotification;
//! use hatago_core::transport::{create_transport, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TransportConfig::stdio("python", &["server.py"]);
//!     let transport = create_transport(&config)?;
//!
//!     let sink: Arc<dyn NotificationSink> =
//!         Arc::new(|upstream: &str, n: JsonRpcNotification| {
//!             eprintln!("{upstream}: {}", n.method);
//!         });
//!     let client =
//!         UpstreamClient::connect("s1", transport, ClientConfig::default(), sink).await?;
//!
//!     let tools = client.discover().await?.tools;
//!     println!("{} tools", tools.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod connector;
pub mod error;
pub mod messages;
pub mod transport;

pub use client::{ClientConfig, Discovery, NotificationSink, ServerHandle, UpstreamClient};
pub use connector::{connect_with_retry, ConnectOptions, TransportFactory};
pub use error::{HubError, HubResult};
pub use messages::{
    Capabilities, Implementation, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ProgressToken, ProtocolVersion,
};
pub use transport::{create_transport, Transport, TransportConfig, TransportEvent};

/// Current version of the hatago-core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP protocol version the hub speaks by default.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

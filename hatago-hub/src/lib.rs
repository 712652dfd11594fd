//! # Hatago hub
//!
//! The hub aggregates many upstream MCP servers behind one MCP endpoint.
//! [`Hub`] owns the per-upstream state machines, the qualified-name
//! registries, the downstream session store, and the notification
//! broker; `handle_json_rpc_request` is the single entry every
//! downstream adapter calls.
//!
//! ```rust,no_run
//! use hatago_common::config::HubConfig;
//! use hatago_hub::{Hub, HubOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HubConfig::from_file("hatago.json")?;
//!     let hub = Hub::new(HubOptions::from_config(&config));
//!     hub.start(&config).await?;
//!     hatago_hub::serve_http(hub, "127.0.0.1:3535".parse()?).await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod broker;
pub mod dispatcher;
pub mod events;
pub mod http;
pub mod hub;
pub mod internal;
pub mod naming;
pub mod registry;
pub mod session;
pub mod state;
pub mod stdio_server;

pub use broker::{Broker, ProgressRoute};
pub use events::{EventBus, HandlerId};
pub use http::{router, serve_http};
pub use hub::{Hub, HubOptions};
pub use internal::{INTERNAL_UPSTREAM_ID, SERVERS_RESOURCE_URI};
pub use naming::{NameRouter, ParsedName};
pub use registry::{CapabilityRegistry, CapabilitySupport, EntryMetadata, Registry};
pub use session::{Session, SessionManager};
pub use state::{StateMachine, StateTransition, UpstreamState};
pub use stdio_server::serve_stdio;

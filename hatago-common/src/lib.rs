//! Shared configuration model and process bootstrap for the Hatago hub.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod logging;

pub use config::{
    HubConfig, NamingConfig, NamingStrategy, RemoteTransportType, Timeouts, UpstreamSpec,
};
pub use logging::{init_logging, metrics_enabled};

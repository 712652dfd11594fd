//! Transport layer abstraction and implementations.
//!
//! A transport is a bidirectional JSON-RPC channel to one upstream MCP
//! server with lifecycle `start -> (send | receive*) -> close`. Three
//! variants exist:
//!
//! - **stdio**: spawns a child process, newline-delimited JSON on
//!   stdin/stdout
//! - **sse**: EventSource-style GET, server events carry JSON-RPC,
//!   outbound messages POSTed to the announced endpoint
//! - **streamable-http**: JSON POST per message with single-JSON or
//!   SSE-framed responses and an `mcp-session-id` correlation header
//!
//! Inbound frames are delivered through the event channel returned by
//! [`Transport::start`]; correlation happens above, in the upstream
//! client, so the same reader path serves responses and notifications.
//! `send` is safe to call from any task: every implementation funnels
//! outbound frames through a single writer so they never interleave.

pub mod config;
pub mod factory;

#[cfg(feature = "stdio")]
pub mod stdio;

#[cfg(feature = "sse")]
pub mod sse;

#[cfg(feature = "streamable-http")]
pub mod streamable;

pub use config::*;
pub use factory::*;

use crate::error::HubResult;
use crate::messages::JsonRpcMessage;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// An inbound transport event.
#[derive(Debug)]
pub enum TransportEvent {
    /// A JSON-RPC frame arrived from the upstream
    Message(JsonRpcMessage),

    /// The channel closed; for process transports the child's exit code
    Closed {
        /// Child exit code when the transport wraps a process
        exit_code: Option<i32>,
    },
}

/// Core transport trait.
///
/// Implementations own their I/O tasks. After [`Transport::close`] the
/// event channel ends with a final [`TransportEvent::Closed`] (or simply
/// drops), and further `send` calls fail with a `Closed` transport error.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the channel and return the inbound event stream.
    ///
    /// Starting twice is an error.
    async fn start(&mut self) -> HubResult<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Queue one outbound frame.
    ///
    /// Serialized internally; returns once the frame is accepted by the
    /// writer, not once it is on the wire.
    async fn send(&self, message: JsonRpcMessage) -> HubResult<()>;

    /// Close the channel and release resources.
    async fn close(&mut self) -> HubResult<()>;

    /// Transport type label for logs and errors.
    fn kind(&self) -> &'static str;
}

/// How long a partial inbound line may sit without progress before it is
/// discarded with a warning.
pub(crate) const PARTIAL_LINE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

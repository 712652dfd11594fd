//! Error types for hub operations.
//!
//! The taxonomy separates failures by who can act on them: user errors
//! (bad names, bad params) are reported and never retried, transport
//! failures are retryable at connect time, timeouts are unconditional,
//! and internal errors indicate bugs.

use std::time::Duration;
use thiserror::Error;

/// The main error type for all hub operations.
#[derive(Error, Debug)]
pub enum HubError {
    /// Transport-level failures (unreachable, framing, closed, timeout)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// MCP protocol violations and handshake failures
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Routing and naming failures (unknown upstream, collisions)
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Upstream lifecycle failures (invalid transitions, connect exhaustion)
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Configuration errors (invalid files, missing parameters)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// The timeout duration in milliseconds
        duration_ms: u64,
    },

    /// The caller cancelled an in-flight request
    #[error("request cancelled")]
    Cancelled,

    /// Serialization/deserialization errors
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        /// The underlying serde_json error
        source: serde_json::Error,
    },

    /// IO errors
    #[error("io error: {source}")]
    Io {
        #[from]
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Invariant violations and bugs
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

/// Failure kinds a transport can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The peer could not be reached (spawn failure, connect refused)
    Unreachable,
    /// Inbound bytes did not frame into a JSON-RPC message
    Framing,
    /// The transport-level operation exceeded its deadline
    Timeout,
    /// The channel closed underneath an operation
    Closed,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unreachable => "unreachable",
            Self::Framing => "framing",
            Self::Timeout => "timeout",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Transport failure with the originating transport type and a reason.
#[derive(Error, Debug, Clone)]
#[error("{kind} ({transport}): {reason}")]
pub struct TransportError {
    /// What went wrong
    pub kind: TransportErrorKind,
    /// Which transport reported it (stdio, sse, streamable-http)
    pub transport: &'static str,
    /// Human-readable detail
    pub reason: String,
}

impl TransportError {
    /// The peer could not be reached.
    pub fn unreachable(transport: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Unreachable,
            transport,
            reason: reason.into(),
        }
    }

    /// Inbound data could not be framed as JSON-RPC.
    pub fn framing(transport: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Framing,
            transport,
            reason: reason.into(),
        }
    }

    /// A transport operation timed out.
    pub fn timeout(transport: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            transport,
            reason: reason.into(),
        }
    }

    /// The channel closed underneath an operation.
    pub fn closed(transport: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Closed,
            transport,
            reason: reason.into(),
        }
    }

    /// Whether reconnecting could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Unreachable | TransportErrorKind::Timeout | TransportErrorKind::Closed
        )
    }
}

/// MCP protocol-level errors.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// The initialize handshake did not complete
    #[error("initialization failed: {reason}")]
    InitializationFailed {
        /// Why the handshake failed
        reason: String,
    },

    /// The upstream declared it does not support this method
    #[error("method '{method}' not supported by upstream '{upstream}'")]
    MethodNotSupported {
        /// The JSON-RPC method
        method: String,
        /// The upstream that lacks the capability
        upstream: String,
    },

    /// A response arrived that does not match the protocol
    #[error("invalid response: {reason}")]
    InvalidResponse {
        /// What was wrong with it
        reason: String,
    },

    /// The upstream returned a JSON-RPC error object
    #[error("upstream error {code}: {message}")]
    UpstreamError {
        /// JSON-RPC error code
        code: i64,
        /// JSON-RPC error message
        message: String,
    },
}

/// Routing and naming errors, reported to the caller and never retried.
#[derive(Error, Debug, Clone)]
pub enum RoutingError {
    /// Registering would collide with an existing public name
    #[error("duplicate public name '{name}'")]
    DuplicatePublic {
        /// The colliding public name
        name: String,
    },

    /// A qualified name referenced an upstream that does not exist
    #[error("unknown upstream '{id}'")]
    UnknownUpstream {
        /// The upstream id parsed out of the public name
        id: String,
    },

    /// No tool registered under this public name
    #[error("unknown tool '{name}'")]
    UnknownTool {
        /// The public tool name
        name: String,
    },

    /// No resource registered under this public URI
    #[error("unknown resource '{uri}'")]
    UnknownResource {
        /// The public resource URI
        uri: String,
    },

    /// No prompt registered under this public name
    #[error("unknown prompt '{name}'")]
    UnknownPrompt {
        /// The public prompt name
        name: String,
    },
}

/// Upstream lifecycle errors.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The requested state change is not in the transition table
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state name
        from: String,
        /// Requested state name
        to: String,
    },

    /// An upstream with this id is already registered
    #[error("server '{id}' already exists")]
    DuplicateServer {
        /// The duplicate id
        id: String,
    },

    /// No upstream with this id is registered
    #[error("server '{id}' not found")]
    UnknownServer {
        /// The missing id
        id: String,
    },

    /// The connector exhausted its retry budget
    #[error("failed to connect '{id}' after {attempts} attempts")]
    ConnectFailed {
        /// The upstream id
        id: String,
        /// How many attempts were made
        attempts: u32,
        /// The last attempt's error
        #[source]
        cause: Box<HubError>,
    },
}

/// Configuration errors.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// The path that was tried
        path: String,
    },

    /// Configuration file has invalid format
    #[error("invalid configuration format in {path}: {reason}")]
    InvalidFormat {
        /// The offending file
        path: String,
        /// Parser detail
        reason: String,
    },

    /// Required configuration parameter is missing
    #[error("missing required configuration parameter: {parameter}")]
    MissingParameter {
        /// The missing parameter
        parameter: String,
    },

    /// Configuration parameter has an invalid value
    #[error("invalid value for parameter '{parameter}': {reason}")]
    InvalidValue {
        /// The offending parameter
        parameter: String,
        /// Why the value is rejected
        reason: String,
    },
}

/// Convenience type alias for Results using HubError.
pub type HubResult<T> = Result<T, HubError>;

impl HubError {
    /// Create a new internal error with a custom message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Whether retrying the operation could plausibly succeed.
    ///
    /// Only transport failures and timeouts qualify; user, protocol, and
    /// configuration errors are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            HubError::Transport(e) => e.is_retryable(),
            HubError::Timeout { .. } => true,
            HubError::Io { .. } => true,
            HubError::Protocol(_)
            | HubError::Routing(_)
            | HubError::Lifecycle(_)
            | HubError::Config(_)
            | HubError::Cancelled
            | HubError::Serialization { .. }
            | HubError::Internal { .. } => false,
        }
    }

    /// Error category label for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            HubError::Transport(_) => "transport",
            HubError::Protocol(_) => "protocol",
            HubError::Routing(_) => "routing",
            HubError::Lifecycle(_) => "lifecycle",
            HubError::Config(_) => "config",
            HubError::Timeout { .. } => "timeout",
            HubError::Cancelled => "cancelled",
            HubError::Serialization { .. } => "serialization",
            HubError::Io { .. } => "io",
            HubError::Internal { .. } => "internal",
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HubError::Transport(TransportError::timeout("http", err.to_string()))
        } else if err.is_connect() {
            HubError::Transport(TransportError::unreachable("http", err.to_string()))
        } else {
            HubError::Transport(TransportError::closed("http", err.to_string()))
        }
    }
}

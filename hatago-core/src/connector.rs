//! Connect-with-retry.
//!
//! The connector turns a transport factory into a handshaken
//! [`UpstreamClient`], retrying with capped exponential backoff. The
//! factory is an injected closure so tests can supply in-memory
//! transports instead of spawning processes or opening sockets.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::client::{ClientConfig, NotificationSink, UpstreamClient};
use crate::error::{HubError, HubResult, LifecycleError};
use crate::transport::Transport;

/// Produces a fresh, unstarted transport for each connection attempt.
pub type TransportFactory = Box<dyn Fn() -> HubResult<Box<dyn Transport>> + Send + Sync>;

/// Base delay for the exponential backoff between attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Retry policy for one upstream.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// How many attempts to make before giving up
    pub max_retries: u32,

    /// Optional cap on each individual attempt; `None` means no
    /// per-attempt deadline
    pub connect_timeout: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            connect_timeout: None,
        }
    }
}

/// Connect to one upstream with retry.
///
/// Each attempt builds a fresh transport, connects, and runs the MCP
/// handshake; the returned client is ready for requests. Failures sleep
/// `500ms * 2^attempt` (no jitter) before the next try. After the retry
/// budget is spent the last error is wrapped in
/// [`LifecycleError::ConnectFailed`].
pub async fn connect_with_retry(
    id: &str,
    factory: &TransportFactory,
    client_config: &ClientConfig,
    sink: &Arc<dyn NotificationSink>,
    options: &ConnectOptions,
) -> HubResult<UpstreamClient> {
    let attempts = options.max_retries.max(1);
    let mut last_error: Option<HubError> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
            debug!(upstream = %id, attempt, ?delay, "backing off before reconnect");
            tokio::time::sleep(delay).await;
        }

        let transport = match factory() {
            Ok(transport) => transport,
            Err(e) => {
                warn!(upstream = %id, attempt, "transport construction failed: {e}");
                last_error = Some(e);
                continue;
            }
        };

        let connect =
            UpstreamClient::connect(id, transport, client_config.clone(), Arc::clone(sink));

        let result = match options.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => Err(HubError::timeout(format!("connect '{id}'"), limit)),
            },
            None => connect.await,
        };

        match result {
            Ok(client) => {
                if attempt > 0 {
                    debug!(upstream = %id, attempt, "connected after retry");
                }
                return Ok(client);
            }
            Err(e) => {
                warn!(upstream = %id, attempt, "connect attempt failed: {e}");
                last_error = Some(e);
            }
        }
    }

    Err(LifecycleError::ConnectFailed {
        id: id.to_string(),
        attempts,
        cause: Box::new(last_error.unwrap_or_else(|| HubError::internal("no attempts made"))),
    }
    .into())
}

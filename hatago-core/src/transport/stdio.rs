//! Stdio transport: a spawned child process speaking newline-delimited
//! JSON-RPC on stdin/stdout.
//!
//! The child inherits the hub's environment extended by the configured
//! variables, and runs in the configured working directory. Its stderr is
//! relayed line-by-line to the log sink. At most one partial stdout line
//! is buffered; a partial line that makes no progress for 60 seconds is
//! cleared with a warning.

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{StdioConfig, Transport, TransportEvent, PARTIAL_LINE_TIMEOUT};
use crate::error::{HubResult, TransportError};
use crate::messages::JsonRpcMessage;

/// Transport over a spawned child process.
pub struct StdioTransport {
    config: StdioConfig,
    outbound: Option<mpsc::UnboundedSender<JsonRpcMessage>>,
    shutdown: Option<CancellationToken>,
}

impl StdioTransport {
    /// Create a new stdio transport from its configuration.
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            outbound: None,
            shutdown: None,
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn start(&mut self) -> HubResult<mpsc::UnboundedReceiver<TransportEvent>> {
        if self.outbound.is_some() {
            return Err(TransportError::closed("stdio", "transport already started").into());
        }

        debug!(command = %self.config.command, args = ?self.config.args, "spawning upstream process");

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| TransportError::unreachable("stdio", format!("spawn failed: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::unreachable("stdio", "child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::unreachable("stdio", "child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::unreachable("stdio", "child stderr unavailable"))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<JsonRpcMessage>();
        let shutdown = CancellationToken::new();

        // Writer: serialize outbound frames one at a time so they never
        // interleave on the wire.
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let line = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("failed to serialize outbound frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    error!("failed to write to child stdin: {e}");
                    break;
                }
                if let Err(e) = stdin.write_all(b"\n").await {
                    error!("failed to write to child stdin: {e}");
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    error!("failed to flush child stdin: {e}");
                    break;
                }
            }
            debug!("stdin writer finished");
        });

        // Stderr is relayed to the log sink, never to stdout.
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            warn!(target: "hatago::upstream", "stderr: {trimmed}");
                        }
                    }
                    Err(e) => {
                        error!("error reading child stderr: {e}");
                        break;
                    }
                }
            }
        });

        // Reader: split stdout into newline frames. The buffer holds at
        // most one partial line; staleness clears it.
        let reader_events = events_tx.clone();
        let mut stdout = stdout;
        tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(8 * 1024);
            loop {
                tokio::select! {
                    read = stdout.read_buf(&mut buf) => match read {
                        Ok(0) => {
                            if !buf.is_empty() {
                                warn!("child stdout closed mid-line, discarding partial frame");
                            }
                            break;
                        }
                        Ok(_) => {
                            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                                let line = buf.split_to(pos + 1);
                                let text = String::from_utf8_lossy(&line);
                                let trimmed = text.trim();
                                if trimmed.is_empty() {
                                    continue;
                                }
                                match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                                    Ok(message) => {
                                        if reader_events.send(TransportEvent::Message(message)).is_err() {
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("unparseable frame from child stdout: {e}");
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            error!("error reading child stdout: {e}");
                            break;
                        }
                    },
                    _ = tokio::time::sleep(PARTIAL_LINE_TIMEOUT), if !buf.is_empty() => {
                        warn!("partial line stalled for {}s, clearing", PARTIAL_LINE_TIMEOUT.as_secs());
                        buf.clear();
                    }
                }
            }
            debug!("stdout reader finished");
        });

        // Supervisor owns the child: reports the exit code, or kills the
        // process when the transport is closed.
        let supervisor_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let exit_code = tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()),
                _ = supervisor_shutdown.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        warn!("failed to kill child process: {e}");
                    }
                    child.wait().await.ok().and_then(|s| s.code())
                }
            };
            debug!(?exit_code, "upstream process exited");
            let _ = events_tx.send(TransportEvent::Closed { exit_code });
        });

        self.outbound = Some(outbound_tx);
        self.shutdown = Some(shutdown);
        Ok(events_rx)
    }

    async fn send(&self, message: JsonRpcMessage) -> HubResult<()> {
        let sender = self
            .outbound
            .as_ref()
            .ok_or_else(|| TransportError::closed("stdio", "transport not started"))?;
        sender
            .send(message)
            .map_err(|_| TransportError::closed("stdio", "child process gone").into())
    }

    async fn close(&mut self) -> HubResult<()> {
        // Dropping the outbound sender lets the writer drain and close the
        // child's stdin before the supervisor kills it.
        self.outbound = None;
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "stdio"
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &str, args: &[&str]) -> StdioConfig {
        StdioConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
            env: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_unreachable() {
        let mut transport = StdioTransport::new(config("hatago-no-such-binary-xyz", &[]));
        let err = transport.start().await.unwrap_err();
        assert_eq!(err.category(), "transport");
    }

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let transport = StdioTransport::new(config("cat", &[]));
        let message = JsonRpcMessage::Notification(
            crate::messages::JsonRpcNotification::without_params("notifications/initialized"),
        );
        assert!(transport.send(message).await.is_err());
    }

    #[tokio::test]
    async fn test_echo_roundtrip_through_cat() {
        let mut transport = StdioTransport::new(config("cat", &[]));
        let mut events = transport.start().await.unwrap();

        let message = JsonRpcMessage::Request(crate::messages::JsonRpcRequest::new(
            1i64,
            "ping",
            serde_json::json!({}),
        ));
        transport.send(message.clone()).await.unwrap();

        match events.recv().await {
            Some(TransportEvent::Message(received)) => assert_eq!(received, message),
            other => panic!("expected echoed frame, got {other:?}"),
        }

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_child_exit_reports_code() {
        let mut transport = StdioTransport::new(config("true", &[]));
        let mut events = transport.start().await.unwrap();

        loop {
            match events.recv().await {
                Some(TransportEvent::Closed { exit_code }) => {
                    assert_eq!(exit_code, Some(0));
                    break;
                }
                Some(_) => continue,
                None => panic!("event channel ended without a close event"),
            }
        }
    }
}

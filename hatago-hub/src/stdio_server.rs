//! Downstream stdio adapter.
//!
//! One JSON object per line on stdin, one per line on stdout; stderr
//! carries logs and nothing else is ever written to stdout. The adapter
//! serves one implicit session whose notification channel shares the
//! stdout writer with responses. Requests are dispatched concurrently,
//! so the downstream sees responses in completion order.

use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use hatago_core::error::HubResult;
use hatago_core::messages::{JsonRpcError, JsonRpcMessage, JsonRpcResponse, RequestId};

use crate::hub::Hub;

const PARTIAL_LINE_TIMEOUT: Duration = Duration::from_secs(60);

/// Serve the hub over stdin/stdout until stdin closes.
pub async fn serve_stdio(hub: Hub) -> HubResult<()> {
    let session = hub.sessions().get_or_create(None);
    let session_id = session.id.clone();
    info!(session = %session_id, "stdio adapter serving");

    let mut notifications = hub.broker().attach_session(&session_id);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    // Single writer keeps frames whole on stdout.
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let notif_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            match serde_json::to_string(&JsonRpcMessage::Notification(notification)) {
                Ok(line) => {
                    if notif_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => error!("failed to serialize notification: {e}"),
            }
        }
    });

    let mut stdin = tokio::io::stdin();
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        tokio::select! {
            read = stdin.read_buf(&mut buf) => match read {
                Ok(0) => {
                    debug!("stdin closed");
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
                        handle_line(&hub, &session_id, trimmed, &out_tx);
                    }
                }
                Err(e) => {
                    error!("error reading stdin: {e}");
                    break;
                }
            },
            _ = tokio::time::sleep(PARTIAL_LINE_TIMEOUT), if !buf.is_empty() => {
                warn!("partial line stalled for {}s, dropping", PARTIAL_LINE_TIMEOUT.as_secs());
                buf.clear();
            }
        }
    }

    hub.broker().detach_session(&session_id);
    hub.sessions().destroy(&session_id);
    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

fn handle_line(
    hub: &Hub,
    session_id: &str,
    line: &str,
    out_tx: &mpsc::UnboundedSender<String>,
) {
    let message: JsonRpcMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            warn!("unparseable frame on stdin: {e}");
            let response =
                JsonRpcResponse::error(RequestId::Null, JsonRpcError::parse_error(e.to_string()));
            if let Ok(line) = serde_json::to_string(&response) {
                let _ = out_tx.send(line);
            }
            return;
        }
    };

    // Dispatch off the read loop so a slow call neither blocks later
    // requests nor stalls progress forwarding.
    let hub = hub.clone();
    let session_id = session_id.to_string();
    let out_tx = out_tx.clone();
    tokio::spawn(async move {
        if let Some(response) = hub.handle_json_rpc_request(message, Some(&session_id)).await {
            match serde_json::to_string(&response) {
                Ok(line) => {
                    let _ = out_tx.send(line);
                }
                Err(e) => error!("failed to serialize response: {e}"),
            }
        }
    });
}

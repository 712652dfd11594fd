//! Scripted MCP server for integration tests.
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout, like any real
//! stdio upstream. Behavior is driven by environment variables so one
//! binary can play every part:
//!
//! - `MOCK_TOOL`: name of the single exposed tool (default `echo`)
//! - `MOCK_SERVER_NAME`: serverInfo name (default `mock-upstream`)
//! - `MOCK_PROGRESS`: comma-separated progress values emitted before a
//!   call result when the call carries a progress token
//! - `MOCK_DELAY_MS`: delay before answering `tools/call`

use serde_json::{json, Value};
use std::io::{BufRead, Write};

fn main() {
    let tool = std::env::var("MOCK_TOOL").unwrap_or_else(|_| "echo".to_string());
    let server_name =
        std::env::var("MOCK_SERVER_NAME").unwrap_or_else(|_| "mock-upstream".to_string());
    let progress: Vec<f64> = std::env::var("MOCK_PROGRESS")
        .map(|raw| {
            raw.split(',')
                .filter_map(|part| part.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();
    let delay_ms: u64 = std::env::var("MOCK_DELAY_MS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(message) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Some(id) = message.get("id").cloned() else {
            // Notifications (initialized, cancelled) need no answer.
            continue;
        };

        match method.as_str() {
            "initialize" => respond(
                &id,
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
                    "serverInfo": { "name": server_name, "version": "1.0.0" },
                }),
            ),
            "tools/list" => respond(
                &id,
                json!({
                    "tools": [{
                        "name": tool,
                        "description": "Echoes its input",
                        "inputSchema": {
                            "type": "object",
                            "properties": { "msg": { "type": "string" } },
                        },
                    }]
                }),
            ),
            "resources/list" => respond(&id, json!({ "resources": [] })),
            "resources/templates/list" => respond(&id, json!({ "resourceTemplates": [] })),
            "prompts/list" => respond(&id, json!({ "prompts": [] })),
            "ping" => respond(&id, json!({})),
            "tools/call" => {
                if delay_ms > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                }
                let params = message.get("params");
                let token = params
                    .and_then(|p| p.get("_meta"))
                    .and_then(|m| m.get("progressToken"))
                    .cloned();
                if let Some(token) = token {
                    for value in &progress {
                        notify(
                            "notifications/progress",
                            json!({
                                "progressToken": token,
                                "progress": value,
                                "total": 100.0,
                            }),
                        );
                    }
                }
                let text = params
                    .and_then(|p| p.get("arguments"))
                    .and_then(|a| a.get("msg"))
                    .and_then(Value::as_str)
                    .unwrap_or(&tool)
                    .to_string();
                respond(&id, json!({ "content": [{ "type": "text", "text": text }] }));
            }
            other => error(&id, -32601, &format!("Method not found: {other}")),
        }
    }
}

fn write_line(value: Value) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{value}");
    let _ = stdout.flush();
}

fn respond(id: &Value, result: Value) {
    write_line(json!({ "jsonrpc": "2.0", "id": id, "result": result }));
}

fn error(id: &Value, code: i64, message: &str) {
    write_line(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    }));
}

fn notify(method: &str, params: Value) {
    write_line(json!({ "jsonrpc": "2.0", "method": method, "params": params }));
}

//! Minimal child tool-serving process used by the proxy-core integration
//! tests. Speaks newline-delimited JSON-RPC over stdio: answers
//! `initialize`, ignores `notifications/initialized`, answers `tools/list`
//! with two canned tools, and echoes `tools/call` arguments back so tests
//! can assert the forwarded payload round-tripped untouched.

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

fn main() {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(req) = serde_json::from_str::<Value>(&line) else { continue };
        let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let Some(id) = req.get("id").cloned() else {
            continue; // notification, no response
        };

        let result = match method {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "serverInfo": {"name": "fake-target", "version": "0.0.0"},
            }),
            "tools/list" => json!({
                "tools": [
                    {"name": "echo", "description": "echoes its input", "inputSchema": {"type": "object"}},
                    {"name": "list_issues", "description": "lists issues", "inputSchema": {"type": "object"}},
                ]
            }),
            "tools/call" => {
                let params = req.get("params").cloned().unwrap_or(Value::Null);
                json!({"echoed": params})
            }
            _ => json!({}),
        };

        let frame = json!({"jsonrpc": "2.0", "id": id, "result": result});
        let _ = writeln!(stdout, "{frame}");
        let _ = stdout.flush();
    }
}

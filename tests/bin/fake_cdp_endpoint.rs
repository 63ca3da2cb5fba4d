//! Minimal CDP-speaking WebSocket endpoint used by the debugger integration
//! tests. Prints its `ws://` URL on the first stdout line, then serves a
//! single connection: enables domains, answers breakpoint/property/evaluate
//! calls with canned data, and emits a `Debugger.paused` event shortly after
//! every `Debugger.resume` (and after the initial `Debugger.pause` +
//! `Runtime.runIfWaitingForDebugger` pair) to simulate a runtime that always
//! breaks again immediately — enough to drive the real handshake and
//! inspection code paths without a real V8 inspector.
//!
//! A `setBreakpointByUrl` request for `app.ts` resolves empty and is
//! followed by a `Debugger.scriptParsed` event for `dist/app.js` carrying a
//! source map, exercising the pending-breakpoint upgrade across the map
//! (spec scenario 4: `app.ts:10:0` maps to `app.js:42:4`).

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

#[tokio::main]
async fn main() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local_addr").port();
    println!("ws://127.0.0.1:{port}/fake");
    use std::io::Write;
    std::io::stdout().flush().ok();

    let (stream, _) = listener.accept().await.expect("accept");
    let ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
    let (mut sink, mut stream) = ws.split();

    let call_frame = json!({
        "callFrameId": "frame1",
        "functionName": "main",
        "location": {"scriptId": "script1", "lineNumber": 0},
        "url": "file:///entry.js",
        "scopeChain": [{
            "type": "local",
            "object": {"type": "object", "objectId": "obj1"},
        }],
        "this": null,
    });

    while let Some(Ok(Message::Text(text))) = stream.next().await {
        let Ok(req) = serde_json::from_str::<Value>(&text) else { continue };
        let id = req.get("id").cloned().unwrap_or(Value::Null);
        let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("");

        let result = match method {
            "Runtime.enable" | "Debugger.enable" | "Runtime.runIfWaitingForDebugger" | "Debugger.removeBreakpoint" => {
                json!({})
            }
            "Debugger.pause" => {
                schedule_paused(&mut sink, call_frame.clone(), "other", 20).await;
                json!({})
            }
            "Debugger.resume" => {
                schedule_resumed_then_paused(&mut sink, call_frame.clone()).await;
                json!({})
            }
            "Debugger.stepOver" | "Debugger.stepInto" | "Debugger.stepOut" => {
                schedule_paused(&mut sink, call_frame.clone(), "step", 20).await;
                json!({})
            }
            "Debugger.setBreakpointByUrl" => {
                let url = req.pointer("/params/url").and_then(|v| v.as_str()).unwrap_or("");
                if url == "app.ts" {
                    schedule_mapped_script_parsed(&mut sink).await;
                    json!({"breakpointId": "bp-sourcemap-1", "locations": []})
                } else {
                    let line = req.pointer("/params/lineNumber").and_then(|v| v.as_u64()).unwrap_or(0);
                    json!({
                        "breakpointId": "bp-url-1",
                        "locations": [{"scriptId": "script1", "lineNumber": line}],
                    })
                }
            }
            "Debugger.setBreakpoint" => {
                let loc = req.pointer("/params/location").cloned().unwrap_or(json!({"scriptId": "script1", "lineNumber": 0}));
                json!({"breakpointId": "bp-precise-1", "actualLocation": loc})
            }
            "Debugger.getPossibleBreakpoints" => {
                let start = req.pointer("/params/start").cloned().unwrap_or(json!({"scriptId": "script1", "lineNumber": 0}));
                json!({"locations": [start]})
            }
            "Runtime.getProperties" => {
                let object_id = req.pointer("/params/objectId").and_then(|v| v.as_str()).unwrap_or("");
                if object_id == "obj1" {
                    json!({"result": [
                        {"name": "x", "value": {"type": "number", "value": 42}, "writable": true, "configurable": true, "enumerable": true},
                    ]})
                } else {
                    json!({"result": []})
                }
            }
            "Debugger.evaluateOnCallFrame" | "Runtime.evaluate" => {
                json!({"result": {"type": "number", "value": 7}})
            }
            _ => json!({}),
        };

        let frame = json!({"id": id, "result": result});
        let _ = sink.send(Message::Text(frame.to_string())).await;
    }
}

async fn schedule_paused<S>(sink: &mut S, call_frame: Value, reason: &str, delay_ms: u64)
where
    S: futures_util::Sink<Message> + Unpin,
{
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    let event = json!({
        "method": "Debugger.paused",
        "params": {"callFrames": [call_frame], "reason": reason, "hitBreakpoints": []},
    });
    let _ = sink.send(Message::Text(event.to_string())).await;
}

async fn schedule_resumed_then_paused<S>(sink: &mut S, call_frame: Value)
where
    S: futures_util::Sink<Message> + Unpin,
{
    let resumed = json!({"method": "Debugger.resumed", "params": {}});
    let _ = sink.send(Message::Text(resumed.to_string())).await;
    schedule_paused(sink, call_frame, "other", 20).await;
}

/// A minimal source map whose single mapping segment translates author
/// `app.ts:10:0` to generated `app.js:42:4` (line/column 0-based), encoded
/// by hand: 42 empty generated lines followed by one VLQ segment
/// (`generatedColumn=4, sourceIndex=0, sourceLine=10, sourceColumn=0`).
fn mapped_source_map_json() -> String {
    let mappings = format!("{}{}", ";".repeat(42), "IAUA");
    json!({
        "version": 3,
        "sources": ["app.ts"],
        "names": [],
        "mappings": mappings,
        "file": "app.js",
    })
    .to_string()
}

async fn schedule_mapped_script_parsed<S>(sink: &mut S)
where
    S: futures_util::Sink<Message> + Unpin,
{
    tokio::time::sleep(Duration::from_millis(10)).await;
    let data_url = format!("data:application/json,{}", mapped_source_map_json());
    let event = json!({
        "method": "Debugger.scriptParsed",
        "params": {
            "scriptId": "script-mapped",
            "url": "dist/app.js",
            "startLine": 0,
            "startColumn": 0,
            "endLine": 100,
            "endColumn": 0,
            "sourceMapUrl": data_url,
        },
    });
    let _ = sink.send(Message::Text(event.to_string())).await;
}

//! Scripted helper process for transport tests.
//!
//! Speaks line-delimited JSON-RPC on stdio. Also misbehaves on purpose. At
//! startup it writes a garbage line, a non-UTF-8 line and stderr chatter. It
//! later sends a response for an id nobody asked about, plus a
//! helper-initiated request the client must refuse.
//!
//! Flags:
//! - `--stall-handshake`: ignore `initialize` entirely
//! - `--slow-handshake`: answer `initialize` after 300ms
//! - `--stop-reading`: stop reading stdin once the handshake completes

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;

type Out = Arc<Mutex<Stdout>>;

async fn send(out: &Out, frame: &Value) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    let mut out = out.lock().await;
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

fn text_result(id: &Value, text: &str, is_error: bool) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {"content": [{"type": "text", "text": text}], "isError": is_error},
    })
}

fn tool(name: &str, description: &str, schema: &Value) -> Value {
    json!({"name": name, "description": description, "inputSchema": schema})
}

fn tool_pages() -> (Vec<Value>, Vec<Value>) {
    let empty = json!({"type": "object", "properties": {}});
    let first = vec![
        tool("ping", "Answer pong", &empty),
        tool(
            "echo",
            "Echo the text argument",
            &json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
        ),
        tool(
            "sleep",
            "Wait, then answer",
            &json!({"type": "object", "properties": {"ms": {"type": "integer"}}, "required": ["ms"]}),
        ),
    ];
    let second = vec![
        tool("fail", "Always reports an error", &empty),
        tool("crash", "Exit the process immediately", &empty),
        tool("probe", "Report the error code of the last client reply", &empty),
        tool("request_id", "Report the JSON-RPC id of this call", &empty),
        tool("garbled", "Reply with an error member that is not an error object", &empty),
    ];
    (first, second)
}

async fn call_tool(out: Out, id: Value, params: Value, last_reply_code: Arc<AtomicI64>) -> anyhow::Result<()> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    match name {
        "ping" => {
            send(&out, &json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {"level": "info"}}))
                .await?;
            send(&out, &text_result(&id, "pong", false)).await
        }
        "echo" => {
            send(&out, &json!({"jsonrpc": "2.0", "id": 999_999, "result": {}})).await?;
            let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
            send(&out, &text_result(&id, text, false)).await
        }
        "sleep" => {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            send(&out, &text_result(&id, &format!("slept {ms}"), false)).await
        }
        "fail" => send(&out, &text_result(&id, "tool failed: boom", true)).await,
        "crash" => {
            eprintln!("mock-helper: crashing on request");
            std::process::exit(3);
        }
        "probe" => {
            let code = last_reply_code.load(Ordering::SeqCst);
            send(&out, &text_result(&id, &code.to_string(), false)).await
        }
        "request_id" => send(&out, &text_result(&id, &id.to_string(), false)).await,
        "garbled" => send(&out, &json!({"jsonrpc": "2.0", "id": id, "error": {"code": "bad"}})).await,
        other => {
            send(
                &out,
                &json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32602, "message": format!("unknown tool {other}")}}),
            )
            .await
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flag = |name: &str| std::env::args().any(|a| a == name);
    let stall_handshake = flag("--stall-handshake");
    let slow_handshake = flag("--slow-handshake");
    let stop_reading = flag("--stop-reading");
    let out: Out = Arc::new(Mutex::new(tokio::io::stdout()));
    let last_reply_code = Arc::new(AtomicI64::new(0));

    eprintln!("mock-helper: starting (pid {})", std::process::id());
    {
        let mut raw = out.lock().await;
        raw.write_all(b"mock-helper banner: this is not json\n").await?;
        raw.write_all(b"\xff\xfe not utf-8 either\n").await?;
        raw.flush().await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            eprintln!("mock-helper: ignoring bad input");
            continue;
        };
        let id = message.get("id").cloned();
        let method = message.get("method").and_then(Value::as_str).map(String::from);

        match (method.as_deref(), id) {
            // A reply to our own request.
            (None, Some(_)) => {
                if let Some(code) = message.pointer("/error/code").and_then(Value::as_i64) {
                    last_reply_code.store(code, Ordering::SeqCst);
                }
            }
            (Some("initialize"), Some(_)) if stall_handshake => {
                eprintln!("mock-helper: stalling handshake");
            }
            (Some("initialize"), Some(id)) => {
                if slow_handshake {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                send(&out, &json!({"jsonrpc": "2.0", "id": "srv-1", "method": "roots/list"})).await?;
                send(
                    &out,
                    &json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "protocolVersion": "2024-11-05",
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": "mock-helper", "version": "0.1.0"},
                        },
                    }),
                )
                .await?;
            }
            (Some("tools/list"), Some(id)) => {
                let (first, second) = tool_pages();
                let result = if message.pointer("/params/cursor").is_some() {
                    json!({"tools": second})
                } else {
                    json!({"tools": first, "nextCursor": "page-2"})
                };
                send(&out, &json!({"jsonrpc": "2.0", "id": id, "result": result})).await?;
            }
            (Some("tools/call"), Some(id)) => {
                let params = message.get("params").cloned().unwrap_or_else(|| json!({}));
                let out = Arc::clone(&out);
                let last_reply_code = Arc::clone(&last_reply_code);
                tokio::spawn(async move {
                    if let Err(err) = call_tool(out, id, params, last_reply_code).await {
                        eprintln!("mock-helper: write failed: {err}");
                    }
                });
            }
            (Some(method), Some(id)) => {
                send(
                    &out,
                    &json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": format!("method not found: {method}")}}),
                )
                .await?;
            }
            (Some("notifications/initialized"), None) if stop_reading => {
                eprintln!("mock-helper: no longer reading stdin");
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            (Some(method), None) => eprintln!("mock-helper: notification {method}"),
            (None, None) => eprintln!("mock-helper: ignoring message without method or id"),
        }
    }

    Ok(())
}

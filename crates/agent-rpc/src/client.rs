//! Stdio JSON-RPC Client
//!
//! Owns one helper child process at a time. A background reader task splits
//! stdout into lines, routes responses to their pending callers by id, answers
//! helper-initiated requests, and tears the session down when the stream ends.
//! stderr is forwarded to tracing and never parsed. A single deadline bounds
//! each call, covering both the stdin write and the wait for the reply.
//!
//! ```text
//! call() ──▶ pending[id] = tx ──▶ stdin
//!                                  helper
//! reader ◀── stdout ◀──────────────┘
//!   └── pending.remove(id).send(result)
//! ```

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;

use crate::config::LaunchConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{
    CallToolResult, Incoming, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsPage,
    METHOD_NOT_FOUND, ToolDescriptor, initialize_params,
};

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value>>>;

/// Longest line echoed into a log message
const LOG_LINE_LIMIT: usize = 200;

/// Bound on answering a helper-initiated request
const REPLY_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared between callers and the reader task
struct Shared {
    stdin: Mutex<ChildStdin>,
    pending: Mutex<PendingMap>,
    closed: AtomicBool,
}

impl Shared {
    async fn write_frame(&self, frame: &impl Serialize) -> Result<()> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Mark closed and reject everything pending. Returns how many were rejected.
    async fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(RpcError::Closed));
        }
        count
    }

    async fn handle_line(self: &Arc<Self>, line: &str) {
        match Incoming::parse(line) {
            Err(err) => {
                tracing::warn!(error = %err, line = %truncate(line), "dropping unparsable line from helper");
            }
            Ok(None) => {
                tracing::warn!(line = %truncate(line), "dropping unroutable message from helper");
            }
            Ok(Some(Incoming::Response { id, outcome })) => {
                let waiter = self.pending.lock().await.remove(&id);
                match waiter {
                    // The caller may have given up in the meantime.
                    Some(tx) => {
                        let _ = tx.send(outcome.map_err(RpcError::from));
                    }
                    None => tracing::debug!(id, "dropping response with no pending call"),
                }
            }
            Ok(Some(Incoming::Request { id, method })) => {
                tracing::debug!(%method, "rejecting helper-initiated request");
                let reply = JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("method not found: {method}"));
                // Off the reader task: a helper that stops reading stdin must
                // not stall response routing.
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    match tokio::time::timeout(REPLY_WRITE_TIMEOUT, shared.write_frame(&reply)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => tracing::warn!(error = %err, "failed to answer helper request"),
                        Err(_) => tracing::warn!(%method, "helper is not reading stdin, reply dropped"),
                    }
                });
            }
            Ok(Some(Incoming::Notification { method, .. })) => {
                tracing::debug!(%method, "helper notification");
            }
        }
    }
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(LOG_LINE_LIMIT) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

async fn read_stdout(shared: Arc<Shared>, stdout: ChildStdout) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) if buf.last() != Some(&b'\n') => {
                tracing::debug!(bytes = buf.len(), "discarding unterminated trailing line");
                break;
            }
            Ok(_) => match std::str::from_utf8(&buf) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        shared.handle_line(line).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, bytes = buf.len(), "dropping non-UTF-8 line from helper");
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "helper stdout read failed");
                break;
            }
        }
    }

    let rejected = shared.close().await;
    tracing::warn!(rejected, "helper stdout closed, session torn down");
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(target: "helper_stderr", "{line}"),
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "helper stderr read failed");
                break;
            }
        }
    }
}

/// One live child process. Not reusable after teardown.
struct Session {
    shared: Arc<Shared>,
    child: Mutex<Child>,
    reader: JoinHandle<()>,
    stderr: JoinHandle<()>,
    call_timeout: Duration,
}

impl Session {
    fn spawn(config: &LaunchConfig) -> Result<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(config.child_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RpcError::Connection(format!("failed to spawn '{}': {e}", config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RpcError::Connection("failed to capture helper stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcError::Connection("failed to capture helper stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RpcError::Connection("failed to capture helper stderr".into()))?;

        let shared = Arc::new(Shared {
            stdin: Mutex::new(stdin),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        Ok(Self {
            reader: tokio::spawn(read_stdout(Arc::clone(&shared), stdout)),
            stderr: tokio::spawn(forward_stderr(stderr)),
            shared,
            child: Mutex::new(child),
            call_timeout: config.call_timeout,
        })
    }

    fn is_open(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
    }

    async fn request(&self, id: u64, method: &str, params: Option<Value>, after: Duration) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        {
            // Checked under the lock so close() cannot miss this entry.
            let mut pending = self.shared.pending.lock().await;
            if !self.is_open() {
                return Err(RpcError::Closed);
            }
            pending.insert(id, tx);
        }

        tracing::debug!(id, method, "sending request");
        let frame = JsonRpcRequest::new(id, method, params);
        let mut written = false;
        // One deadline covers the write and the wait for the reply.
        let exchange = tokio::time::timeout(after, async {
            self.shared.write_frame(&frame).await?;
            written = true;
            rx.await.unwrap_or(Err(RpcError::Closed))
        })
        .await;

        match exchange {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => {
                self.shared.pending.lock().await.remove(&id);
                Err(err)
            }
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                if written {
                    tracing::warn!(id, method, ?after, "request timed out");
                } else {
                    tracing::warn!(id, method, ?after, "helper stopped reading stdin, tearing session down");
                    self.shutdown().await;
                }
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    after,
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.is_open() {
            return Err(RpcError::Closed);
        }
        let frame = JsonRpcNotification::new(method, params);
        match tokio::time::timeout(self.call_timeout, self.shared.write_frame(&frame)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(method, "helper stopped reading stdin, tearing session down");
                self.shutdown().await;
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    after: self.call_timeout,
                })
            }
        }
    }

    async fn shutdown(&self) -> usize {
        let rejected = self.shared.close().await;
        let mut child = self.child.lock().await;
        if let Err(err) = child.kill().await {
            tracing::debug!(error = %err, "helper already exited");
        }
        self.reader.abort();
        self.stderr.abort();
        rejected
    }
}

/// JSON-RPC client for one helper process
///
/// Safe to share across concurrent runs: calls on a connected session proceed
/// concurrently, while `connect`/`disconnect` take the session exclusively.
pub struct RpcClient {
    session: RwLock<Option<Arc<Session>>>,
    next_id: AtomicU64,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcClient {
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a client and connect it
    pub async fn connected(config: &LaunchConfig) -> Result<Self> {
        let client = Self::new();
        client.connect(config).await?;
        Ok(client)
    }

    fn fresh_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawn the helper and complete the initialize handshake.
    ///
    /// Calls issued while this runs wait for it to finish.
    pub async fn connect(&self, config: &LaunchConfig) -> Result<()> {
        let mut slot = self.session.write().await;
        if let Some(existing) = slot.take() {
            if existing.is_open() {
                *slot = Some(existing);
                return Err(RpcError::Connection("already connected".into()));
            }
            existing.shutdown().await;
        }

        tracing::info!(command = %config.command, args = ?config.args, "starting helper process");
        let session = Session::spawn(config)?;

        let params = initialize_params(&config.client_name, &config.client_version);
        let init = match session
            .request(self.fresh_id(), "initialize", Some(params), config.handshake_timeout)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                session.shutdown().await;
                return Err(RpcError::Connection(format!("handshake failed: {err}")));
            }
        };
        if let Err(err) = session.notify("notifications/initialized", None).await {
            session.shutdown().await;
            return Err(RpcError::Connection(format!("handshake failed: {err}")));
        }

        tracing::info!(
            server = %init.pointer("/serverInfo/name").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            protocol = %init.get("protocolVersion").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "helper connected"
        );
        *slot = Some(Arc::new(session));
        Ok(())
    }

    /// Kill the helper and reject every pending call. Idempotent.
    pub async fn disconnect(&self) {
        let session = self.session.write().await.take();
        if let Some(session) = session {
            let rejected = session.shutdown().await;
            tracing::info!(rejected, "helper disconnected");
        }
    }

    async fn live_session(&self) -> Result<Arc<Session>> {
        {
            let slot = self.session.read().await;
            match slot.as_ref() {
                Some(session) if session.is_open() => return Ok(Arc::clone(session)),
                Some(_) => {}
                None => return Err(RpcError::Connection("not connected".into())),
            }
        }

        // The helper died on its own; reap it so a later connect() starts clean.
        let mut slot = self.session.write().await;
        if slot.as_ref().is_some_and(|s| !s.is_open()) {
            if let Some(dead) = slot.take() {
                dead.shutdown().await;
            }
        }
        Err(RpcError::Connection("helper process exited".into()))
    }

    /// Send a request and wait for its result, bounded by the call timeout
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let session = self.live_session().await?;
        let after = session.call_timeout;
        session.request(self.fresh_id(), method, params, after).await
    }

    /// Same as [`call`](Self::call) with an explicit timeout
    pub async fn call_with_timeout(&self, method: &str, params: Option<Value>, after: Duration) -> Result<Value> {
        let session = self.live_session().await?;
        session.request(self.fresh_id(), method, params, after).await
    }

    /// Fire-and-forget
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.live_session().await?.notify(method, params).await
    }

    /// All tools the helper exposes, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.map_or_else(|| json!({}), |c| json!({"cursor": c}));
            let page: ListToolsPage = serde_json::from_value(self.call("tools/list", Some(params)).await?)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// `tools/call`; an `isError` result is returned, not raised
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let result = self
            .call("tools/call", Some(json!({"name": name, "arguments": arguments})))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.as_ref().is_some_and(|s| s.is_open())
    }

    /// Calls currently awaiting a response
    pub async fn pending_count(&self) -> usize {
        let session = self.session.read().await.clone();
        match session {
            Some(session) => session.shared.pending.lock().await.len(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(LOG_LINE_LIMIT + 10);
        assert_eq!(truncate(&long).chars().count(), LOG_LINE_LIMIT);
        assert_eq!(truncate("short"), "short");
    }

    #[tokio::test]
    async fn test_calls_without_session_fail_fast() {
        let client = RpcClient::new();
        assert!(matches!(client.call("tools/list", None).await, Err(RpcError::Connection(_))));
        assert!(!client.is_connected().await);
        assert_eq!(client.pending_count().await, 0);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let client = RpcClient::new();
        let err = client
            .connect(&LaunchConfig::new("/nonexistent/helper-binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Connection(msg) if msg.contains("failed to spawn")));
    }
}

//! One session with an external tool source.
//!
//! A background reader task owns the read half and routes every response to
//! the oneshot registered under its request id, so overlapping calls on one
//! session never see each other's answers. Writes are serialized behind a
//! mutex, one JSON object per line.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use super::error::{GatewayError, Result};
use super::protocol::{
    self, Incoming, JsonRpcNotification, JsonRpcRequest, ResourceInfo, ToolInfo, PROTOCOL_VERSION,
};

/// Request awaiting its response
enum Waiter {
    Live(oneshot::Sender<Value>),
    /// Timed out; its late reply is consumed and dropped
    Abandoned,
}

type Pending = Arc<Mutex<HashMap<u64, Waiter>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, HashMap<u64, Waiter>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct ExternalSession {
    name: String,
    next_id: AtomicU64,
    pending: Pending,
    writer: tokio::sync::Mutex<Option<BufWriter<BoxedWriter>>>,
    child: tokio::sync::Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    call_timeout: Duration,
}

impl ExternalSession {
    /// Attach to an already-open transport
    pub fn connect<R, W>(name: impl Into<String>, reader: R, writer: W, call_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let name = name.into();
        let pending: Pending = Arc::default();
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(Self::reader_loop(
            name.clone(),
            reader,
            Arc::clone(&pending),
            Arc::clone(&alive),
        ));

        let writer: BoxedWriter = Box::new(writer);
        Self {
            name,
            next_id: AtomicU64::new(1),
            pending,
            writer: tokio::sync::Mutex::new(Some(BufWriter::new(writer))),
            child: tokio::sync::Mutex::new(None),
            alive,
            reader,
            call_timeout,
        }
    }

    /// Launch a source as a child process speaking over stdio
    pub fn spawn(
        name: impl Into<String>,
        server: &ServerConfig,
        global_env: &HashMap<String, String>,
        call_timeout: Duration,
    ) -> Result<Self> {
        let name = name.into();
        let mut child = Command::new(&server.command)
            .args(&server.args)
            .envs(global_env)
            .envs(&server.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GatewayError::Spawn {
                command: server.command.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(GatewayError::TransportClosed)?;
        let stdout = child.stdout.take().ok_or(GatewayError::TransportClosed)?;
        if let Some(stderr) = child.stderr.take() {
            let source = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(source = %source, "{}", line);
                }
            });
        }

        tracing::info!(source = %name, command = %server.command, pid = ?child.id(), "Spawned external tool source");

        let mut session = Self::connect(name, stdout, stdin, call_timeout);
        *session.child.get_mut() = Some(child);
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport still open
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Background task: read lines and route them
    async fn reader_loop<R: AsyncRead + Unpin>(name: String, reader: R, pending: Pending, alive: Arc<AtomicBool>) {
        let mut lines = BufReader::new(reader).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let Ok(message) = serde_json::from_str::<Value>(line) else {
                        tracing::debug!(source = %name, line, "Ignoring non-JSON output");
                        continue;
                    };

                    let waiter = match protocol::classify(&message) {
                        Incoming::Response(id) => lock(&pending).remove(&id),
                        Incoming::Unkeyed => {
                            let mut pending = lock(&pending);
                            let oldest = pending.keys().min().copied();
                            oldest.and_then(|id| pending.remove(&id))
                        }
                        Incoming::Notification(method) => {
                            tracing::debug!(source = %name, method = %method, "Notification from source");
                            continue;
                        }
                    };

                    match waiter {
                        Some(Waiter::Live(tx)) => {
                            let _ = tx.send(message);
                        }
                        Some(Waiter::Abandoned) => {
                            tracing::debug!(source = %name, "Dropping late response to a timed-out request");
                        }
                        None => tracing::debug!(source = %name, "Response with no pending request"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(source = %name, error = %e, "Failed reading from source");
                    break;
                }
            }
        }

        alive.store(false, Ordering::SeqCst);
        // Dropping the senders fails every waiting request
        lock(&pending).clear();
        tracing::info!(source = %name, "External tool session closed");
    }

    async fn write<T: Serialize>(&self, message: &T) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(GatewayError::TransportClosed)?;
        let written = match writer.write_all(line.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            self.alive.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    /// Send a request and wait for the raw correlated response
    async fn exchange(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_alive() {
            return Err(GatewayError::TransportClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, Waiter::Live(tx));

        if let Err(e) = self.write(&JsonRpcRequest::new(id, method, params)).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(GatewayError::TransportClosed),
            Err(_) => {
                if let Some(waiter) = lock(&self.pending).get_mut(&id) {
                    *waiter = Waiter::Abandoned;
                }
                Err(GatewayError::Timeout(method.to_string()))
            }
        }
    }

    /// Send a request and return its `result` payload
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        protocol::into_result(self.exchange(method, params).await?)
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.write(&JsonRpcNotification::new(method, params)).await
    }

    /// Handshake. A source that rejects `initialize` is still usable.
    pub async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let response = self.exchange("initialize", params).await?;
        let enveloped = protocol::is_enveloped(&response);
        if let Err(e) = protocol::into_result(response) {
            tracing::debug!(source = %self.name, error = %e, "Source rejected initialize, continuing");
        }

        if enveloped {
            self.notify("notifications/initialized", json!({})).await?;
        }
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let mut result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get_mut("tools")
            .map(Value::take)
            .ok_or_else(|| GatewayError::Malformed("tools/list without 'tools'".into()))?;
        serde_json::from_value(tools).map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    /// Invoke a tool and join its text content
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;

        let text = protocol::join_text(&result, "content")
            .ok_or_else(|| GatewayError::Malformed(format!("tools/call without content: {}", result)))?;

        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            return Err(GatewayError::ToolReported(text));
        }
        Ok(text)
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceInfo>> {
        let mut result = self.request("resources/list", json!({})).await?;
        let resources = result
            .get_mut("resources")
            .map(Value::take)
            .ok_or_else(|| GatewayError::Malformed("resources/list without 'resources'".into()))?;
        serde_json::from_value(resources).map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    pub async fn read_resource(&self, uri: &str) -> Result<String> {
        let result = self.request("resources/read", json!({ "uri": uri })).await?;
        protocol::join_text(&result, "contents")
            .ok_or_else(|| GatewayError::Malformed(format!("resources/read without contents: {}", result)))
    }

    /// Close stdin, wait up to `grace` for the process to exit, then kill it
    pub async fn shutdown(&self, grace: Duration) {
        self.alive.store(false, Ordering::SeqCst);
        self.writer.lock().await.take();
        lock(&self.pending).clear();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(source = %self.name, %status, "External tool source exited");
                }
                _ => {
                    tracing::warn!(source = %self.name, "Source did not exit in time, killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(source = %self.name, error = %e, "Failed to kill source");
                    }
                }
            }
        }
        self.reader.abort();
    }
}

impl Drop for ExternalSession {
    fn drop(&mut self) {
        // the child, if any, is killed by kill_on_drop
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};

    /// Fake source speaking the enveloped protocol; requests run concurrently
    async fn fake_source(stream: DuplexStream) {
        let (read, write) = tokio::io::split(stream);
        let write = Arc::new(tokio::sync::Mutex::new(write));
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let Some(id) = request.get("id").cloned() else {
                continue;
            };
            let write = Arc::clone(&write);
            tokio::spawn(async move {
                let response = match answer(&request).await {
                    Some(Ok(result)) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    Some(Err(message)) => {
                        json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": message}})
                    }
                    None => return,
                };
                let mut write = write.lock().await;
                write.write_all(format!("{}\n", response).as_bytes()).await.unwrap();
            });
        }
    }

    async fn answer(request: &Value) -> Option<std::result::Result<Value, String>> {
        let args = &request["params"]["arguments"];
        let result = match request["method"].as_str()? {
            "initialize" => json!({"protocolVersion": PROTOCOL_VERSION, "capabilities": {}}),
            "tools/list" => json!({"tools": [{
                "name": "echo",
                "description": "Echo text back",
                "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}
            }]}),
            "tools/call" if request["params"]["name"] == "broken" => json!({"unexpected": true}),
            "tools/call" => {
                if let Some(ms) = args.get("delay_ms").and_then(Value::as_u64) {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                json!({"content": [{"type": "text", "text": args["text"].clone()}]})
            }
            "resources/read" => json!({"contents": [{"uri": request["params"]["uri"], "text": "resource body"}]}),
            "silence" => return None,
            _ => return Some(Err("Method not found".into())),
        };
        Some(Ok(result))
    }

    fn session_with_fake(timeout: Duration) -> ExternalSession {
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(fake_source(server));
        let (read, write): (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) = tokio::io::split(client);
        ExternalSession::connect("fake", read, write, timeout)
    }

    #[tokio::test]
    async fn test_handshake_and_discovery() {
        let session = session_with_fake(Duration::from_secs(2));
        session.initialize().await.unwrap();

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].input_schema["required"][0], "text");
    }

    #[tokio::test]
    async fn test_overlapping_calls_are_correlated() {
        let session = Arc::new(session_with_fake(Duration::from_secs(2)));

        let slow = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.call_tool("echo", json!({"text": "slow", "delay_ms": 100})).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let fast = session.call_tool("echo", json!({"text": "fast"})).await.unwrap();

        assert_eq!(fast, "fast");
        assert_eq!(slow.await.unwrap().unwrap(), "slow");
    }

    #[tokio::test]
    async fn test_timeout_and_malformed_response() {
        let session = session_with_fake(Duration::from_millis(50));

        assert!(matches!(session.request("silence", json!({})).await, Err(GatewayError::Timeout(_))));
        assert!(matches!(
            session.call_tool("broken", json!({})).await,
            Err(GatewayError::Malformed(_))
        ));
        assert!(matches!(session.request("prompts/list", json!({})).await, Err(GatewayError::Rpc { code: -32601, .. })));
        assert_eq!(session.read_resource("mem://notes").await.unwrap(), "resource body");
    }

    #[tokio::test]
    async fn test_unkeyed_answers_follow_request_order() {
        let (client, server) = duplex(4096);
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let response = match request["method"].as_str().unwrap() {
                    "tools/list" => json!({"tools": [{"name": "bare", "description": null, "inputSchema": {}}]}),
                    method => json!({"error": format!("Method '{}' not supported", method)}),
                };
                write.write_all(format!("{}\n", response).as_bytes()).await.unwrap();
            }
        });

        let (read, write) = tokio::io::split(client);
        let session = ExternalSession::connect("bare", read, write, Duration::from_secs(2));
        // rejected handshake, no notification sent
        session.initialize().await.unwrap();
        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "bare");
        assert!(tools[0].description.is_none());
    }

    #[tokio::test]
    async fn test_late_unkeyed_answer_is_not_given_to_next_call() {
        // answers in request order without ids; "slow" takes longer than the call timeout
        let (client, server) = duplex(4096);
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let name = request["params"]["name"].as_str().unwrap_or_default().to_string();
                if name == "slow" {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                let response = json!({"content": [{"type": "text", "text": name}]});
                write.write_all(format!("{}\n", response).as_bytes()).await.unwrap();
            }
        });

        let (read, write) = tokio::io::split(client);
        let session = ExternalSession::connect("sequential", read, write, Duration::from_millis(200));

        assert!(matches!(
            session.call_tool("slow", json!({})).await,
            Err(GatewayError::Timeout(_))
        ));
        assert_eq!(session.call_tool("fast", json!({})).await.unwrap(), "fast");
    }

    #[tokio::test]
    async fn test_closed_transport_fails_pending_and_future_calls() {
        let (client, server) = duplex(1024);
        let (read, write) = tokio::io::split(client);
        let session = ExternalSession::connect("gone", read, write, Duration::from_secs(5));

        drop(server);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!session.is_alive());
        assert!(matches!(session.list_tools().await, Err(GatewayError::TransportClosed)));
    }
}

//! Client side of the bridge: spawns (or attaches to) a server, correlates
//! responses to requests by id, and enforces a per-call timeout.
//!
//! Calls are at-most-once. A call that times out is forgotten locally; if
//! its response arrives later it matches no waiting caller and is dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, McpErrorResponse, RpcId, ToolResult, PROTOCOL_VERSION,
};
use crate::registry::ToolDescriptor;

/// Default budget for a single request (30 seconds).
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default budget for spawn plus handshake (30 seconds).
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("{method} timed out after {} ms", after.as_millis())]
    Timeout { method: String, after: Duration },
    #[error("Tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },
    #[error("Server returned error {code}: {message}")]
    Rpc { code: i32, message: String },
    #[error("Connection closed while waiting for a response")]
    ConnectionClosed,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Waiters by request id. `closed` is set under the same lock once the
/// server's output ends, so no waiter is registered after the final drain.
#[derive(Default)]
struct Pending {
    waiters: HashMap<i64, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

type PendingMap = Arc<Mutex<Pending>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Connection {
    writer: tokio::sync::Mutex<BoxedWriter>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    child: Option<Child>,
}

impl Connection {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Register a waiter for `id`, unless the server has already gone away.
    fn expect(&self, id: i64) -> Result<oneshot::Receiver<JsonRpcResponse>, ClientError> {
        let mut pending = lock(&self.pending);
        if pending.closed {
            return Err(ClientError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        pending.waiters.insert(id, tx);
        Ok(rx)
    }

    fn forget(&self, id: i64) {
        lock(&self.pending).waiters.remove(&id);
    }

    async fn send(&self, req: &JsonRpcRequest) -> Result<(), ClientError> {
        let mut line = serde_json::to_vec(req).map_err(|e| ClientError::Protocol(e.to_string()))?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct McpClient {
    config: ClientConfig,
    connection: Option<Connection>,
    next_id: AtomicI64,
}

impl McpClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connection: None,
            next_id: AtomicI64::new(1),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// True while a transport is attached and the server has not closed it.
    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    /// Spawn the configured server and complete the handshake.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        self.release_closed().await?;

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .envs(self.config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ClientError::Connection(format!(
                    "cannot start {}: {e}",
                    self.config.command.display()
                ))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill().await;
            return Err(ClientError::Connection("server stdio not captured".into()));
        };

        tracing::debug!(command = %self.config.command.display(), "spawned server");
        self.attach(stdout, Box::new(stdin), Some(child));
        self.handshake().await
    }

    /// Attach to an already running server over `reader`/`writer` and
    /// complete the handshake.
    pub async fn connect_stream<R, W>(&mut self, reader: R, writer: W) -> Result<(), ClientError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.release_closed().await?;
        self.attach(reader, Box::new(writer), None);
        self.handshake().await
    }

    /// Close the transport and stop the server if this client spawned it.
    /// Calling it again is a no-op.
    pub async fn disconnect(&mut self) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };

        {
            let mut writer = conn.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        conn.reader.abort();
        {
            let mut pending = lock(&conn.pending);
            pending.closed = true;
            pending.waiters.clear();
        }

        if let Some(child) = conn.child.as_mut() {
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to stop server process: {e}");
            }
        }
        tracing::debug!("disconnected");
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        let result = self
            .request("tools/list", None, self.config.request_timeout)
            .await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| ClientError::Protocol("tools/list result has no tools".into()))?;
        serde_json::from_value(tools).map_err(|e| ClientError::Protocol(e.to_string()))
    }

    /// Invoke a tool and return its result, decoded from the text content.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self
            .request("tools/call", Some(params), self.config.request_timeout)
            .await?;
        let tool_result: ToolResult =
            serde_json::from_value(result).map_err(|e| ClientError::Protocol(e.to_string()))?;

        let text = tool_result.joined_text();
        if tool_result.is_error {
            let message = serde_json::from_str::<McpErrorResponse>(&text)
                .map(|mcp| mcp.error.message)
                .unwrap_or(text);
            return Err(ClientError::ToolExecution {
                tool: name.to_string(),
                message,
            });
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    pub async fn initialize_vm(&self, config: Value) -> Result<Value, ClientError> {
        self.call_tool("initialize_vm", json!({ "config": config })).await
    }

    pub async fn execute_step(&self, instruction: &str) -> Result<Value, ClientError> {
        self.call_tool("execute_vm_step", json!({ "instruction": instruction }))
            .await
    }

    pub async fn run_program(&self, program: &str, parameters: Value) -> Result<Value, ClientError> {
        self.call_tool(
            "run_uor_program",
            json!({ "program": program, "parameters": parameters }),
        )
        .await
    }

    pub async fn provide_input(&self, value: i64) -> Result<Value, ClientError> {
        self.call_tool("provide_vm_input", json!({ "value": value })).await
    }

    pub async fn analyze_state(&self) -> Result<Value, ClientError> {
        self.call_tool("analyze_vm_state", json!({})).await
    }

    pub async fn instruction_trace(&self, limit: Option<u64>) -> Result<Value, ClientError> {
        let arguments = match limit {
            Some(limit) => json!({ "limit": limit }),
            None => json!({}),
        };
        self.call_tool("vm_instruction_trace", arguments).await
    }

    /// Refuse a live connection; drop one the server has already closed.
    async fn release_closed(&mut self) -> Result<(), ClientError> {
        match &self.connection {
            Some(conn) if conn.is_open() => Err(ClientError::AlreadyConnected),
            Some(_) => {
                self.disconnect().await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn attach<R>(&mut self, reader: R, writer: BoxedWriter, child: Option<Child>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pending: PendingMap = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_responses(
            reader,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));
        self.connection = Some(Connection {
            writer: tokio::sync::Mutex::new(writer),
            pending,
            closed,
            reader,
            child,
        });
    }

    async fn handshake(&mut self) -> Result<(), ClientError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcp-vm-bridge-client",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let outcome = match self
            .request("initialize", Some(params), self.config.connect_timeout)
            .await
        {
            Ok(_) => self.notify("notifications/initialized").await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            self.disconnect().await;
            return Err(match e {
                ClientError::Connection(msg) => ClientError::Connection(msg),
                other => ClientError::Connection(format!("handshake failed: {other}")),
            });
        }
        Ok(())
    }

    async fn notify(&self, method: &str) -> Result<(), ClientError> {
        let conn = self.connection.as_ref().ok_or(ClientError::NotConnected)?;
        conn.send(&JsonRpcRequest::notification(method)).await
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        budget: Duration,
    ) -> Result<Value, ClientError> {
        let conn = self.connection.as_ref().ok_or(ClientError::NotConnected)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = conn.expect(id)?;

        let req = JsonRpcRequest::new(RpcId::Number(id), method, params);
        if let Err(e) = conn.send(&req).await {
            conn.forget(id);
            return Err(if conn.is_open() { e } else { ClientError::ConnectionClosed });
        }

        let response = match tokio::time::timeout(budget, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                conn.forget(id);
                tracing::debug!(id, method, "request timed out; abandoning");
                return Err(ClientError::Timeout {
                    method: method.to_string(),
                    after: budget,
                });
            }
        };

        if let Some(error) = response.error {
            return Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

/// Route each incoming response to the caller waiting on its id. When the
/// stream ends the connection is marked closed and every waiter is released
/// with `ConnectionClosed`.
async fn read_responses<R>(reader: R, pending: PendingMap, closed: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("transport read failed: {e}");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response: JsonRpcResponse = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("discarding unparseable message: {e}");
                continue;
            }
        };

        match response.id.clone() {
            Some(RpcId::Number(id)) => {
                let waiter = lock(&pending).waiters.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!(id, "discarding response with no waiting caller"),
                }
            }
            other => tracing::warn!(id = ?other, "discarding response with foreign id"),
        }
    }

    let mut state = lock(&pending);
    state.closed = true;
    closed.store(true, Ordering::Release);
    state.waiters.clear();
    tracing::debug!("server closed the connection");
}

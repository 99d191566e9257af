use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::audit::{InvocationSink, TracingSink};
use crate::config::ServerConfig;
use crate::handlers::{self, Dispatcher, ToolContext};
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::registry::ToolRegistry;

/// Maximum bytes per JSON-RPC message (1 MiB).
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Responses queued for the writer task before readers wait.
const OUTBOUND_QUEUE: usize = 64;

pub type ServerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// MCP server that communicates over newline-delimited JSON-RPC 2.0.
///
/// `tools/call` requests run on their own tasks, so a slow tool does not
/// hold up the read loop. Every other method is answered inline.
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    initialized: bool,
}

impl McpServer {
    /// Server with the built-in tools and the `tracing` invocation sink.
    pub fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let ctx = Arc::new(ToolContext::from_config(&config)?);
        let registry = handlers::builtin_registry(&ctx)?;
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::new(TracingSink),
            config.tool_timeout,
        )
        .with_resources(ctx);
        Ok(Self::from_dispatcher(dispatcher))
    }

    /// Server over a caller-supplied registry and sink.
    pub fn with_registry(
        config: &ServerConfig,
        registry: ToolRegistry,
        sink: Arc<dyn InvocationSink>,
    ) -> Self {
        Self::from_dispatcher(Dispatcher::new(Arc::new(registry), sink, config.tool_timeout))
    }

    /// Server over a fully configured dispatcher.
    pub fn from_dispatcher(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            initialized: false,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serve on process stdio until stdin closes.
    pub async fn run(&mut self) -> ServerResult {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve on an arbitrary transport until `reader` reaches end of input.
    ///
    /// In-flight tool calls are allowed to finish and their responses are
    /// flushed before this returns.
    pub async fn serve<R, W>(&mut self, reader: R, writer: W) -> ServerResult
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<JsonRpcResponse>(OUTBOUND_QUEUE);
        let writer_task = tokio::spawn(write_responses(writer, rx));
        let mut in_flight = JoinSet::new();

        let read_result = self.read_loop(reader, &tx, &mut in_flight).await;

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Tool call task failed: {e}");
            }
        }
        drop(tx);

        let write_result = writer_task.await?;
        read_result?;
        write_result
    }

    async fn read_loop<R>(
        &mut self,
        reader: R,
        tx: &mpsc::Sender<JsonRpcResponse>,
        in_flight: &mut JoinSet<()>,
    ) -> ServerResult
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();

        loop {
            raw.clear();
            let n = reader.read_until(b'\n', &mut raw).await?;
            if n == 0 {
                break;
            }

            if n > MAX_MESSAGE_BYTES {
                tracing::warn!("Message too large: {n} bytes (limit {MAX_MESSAGE_BYTES})");
                send(tx, JsonRpcResponse::error(None, JsonRpcError::parse_error())).await?;
                continue;
            }

            let trimmed = match std::str::from_utf8(&raw) {
                Ok(s) => s.trim(),
                Err(_) => {
                    send(tx, JsonRpcResponse::error(None, JsonRpcError::parse_error())).await?;
                    continue;
                }
            };

            if trimmed.is_empty() {
                continue;
            }

            let req: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Parse error: {e}");
                    send(tx, JsonRpcResponse::error(None, JsonRpcError::parse_error())).await?;
                    continue;
                }
            };

            // Validate jsonrpc version
            if req.jsonrpc != "2.0" {
                send(
                    tx,
                    JsonRpcResponse::error(req.id.clone(), JsonRpcError::invalid_request()),
                )
                .await?;
                continue;
            }

            // Initialization gate: only `initialize` is allowed before handshake completes
            if !self.initialized && req.method != "initialize" {
                if req.id.is_none() {
                    continue;
                }
                send(
                    tx,
                    JsonRpcResponse::error(
                        req.id.clone(),
                        JsonRpcError::invalid_request_with("Server not initialized"),
                    ),
                )
                .await?;
                continue;
            }

            if req.method == "tools/call" || req.method == "call_tool" {
                self.spawn_tool_call(req, tx.clone(), in_flight);
                continue;
            }

            if let Some(resp) = self.dispatcher.dispatch(&req).await {
                send(tx, resp).await?;
            }

            if req.method == "initialize" {
                self.initialized = true;
            }
        }

        Ok(())
    }

    /// Run a tool call on its own task. A panicking handler still yields
    /// exactly one `isError` response.
    fn spawn_tool_call(
        &self,
        req: JsonRpcRequest,
        tx: mpsc::Sender<JsonRpcResponse>,
        in_flight: &mut JoinSet<()>,
    ) {
        let dispatcher = Arc::clone(&self.dispatcher);
        in_flight.spawn(async move {
            let id = req.id.clone();
            let tool = req
                .params
                .as_ref()
                .and_then(|p| p.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or("<unnamed>")
                .to_string();
            let started = Instant::now();

            let worker = Arc::clone(&dispatcher);
            let handle = tokio::spawn(async move { worker.dispatch(&req).await });

            let response = match handle.await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::error!(tool = %tool, "Tool handler aborted: {e}");
                    let result = dispatcher.record_panic(&tool, started.elapsed());
                    Some(JsonRpcResponse::tool(id.clone(), &result))
                }
            };

            // Notifications get no response.
            if let (Some(resp), Some(_)) = (response, id) {
                if tx.send(resp).await.is_err() {
                    tracing::warn!(tool = %tool, "Transport closed before response was written");
                }
            }
        });
    }
}

async fn send(
    tx: &mpsc::Sender<JsonRpcResponse>,
    resp: JsonRpcResponse,
) -> ServerResult {
    tx.send(resp)
        .await
        .map_err(|_| "response writer stopped".into())
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<JsonRpcResponse>) -> ServerResult
where
    W: AsyncWrite + Unpin,
{
    while let Some(resp) = rx.recv().await {
        write_response(&mut writer, &resp).await?;
    }
    Ok(())
}

async fn write_response<W>(writer: &mut W, resp: &JsonRpcResponse) -> ServerResult
where
    W: AsyncWrite + Unpin,
{
    let out = serde_json::to_string(resp)?;
    writer.write_all(out.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

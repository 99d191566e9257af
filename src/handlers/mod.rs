pub mod health;
pub mod program;
pub mod resources;
pub mod vm;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audit::{InvocationEvent, InvocationOutcome, InvocationSink};
use crate::config::ServerConfig;
use crate::engine::{VmConfig, VmSession};
use crate::error::ToolError;
use crate::protocol::{
    InitializeParams, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpErrorResponse,
    ResourceReadParams, ToolCallParams, ToolResult, PROTOCOL_VERSION,
};
use crate::registry::{RegistryError, ToolRegistry};
use crate::upstream::{HttpUpstream, Upstream};

/// State shared by the built-in tool handlers.
pub struct ToolContext {
    pub session: VmSession,
    pub upstream: Option<Arc<dyn Upstream>>,
    pub default_vm: VmConfig,
}

impl ToolContext {
    pub fn new(default_vm: VmConfig, upstream: Option<Arc<dyn Upstream>>) -> Self {
        Self {
            session: VmSession::new(),
            upstream,
            default_vm,
        }
    }

    /// Build from server configuration, wiring the HTTP upstream if configured.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ToolError> {
        let upstream = match &config.upstream_url {
            Some(url) => {
                let http = HttpUpstream::new(url.clone(), config.upstream_timeout)?;
                Some(Arc::new(http) as Arc<dyn Upstream>)
            }
            None => None,
        };
        Ok(Self::new(config.default_vm.clone(), upstream))
    }
}

/// Registry with every built-in tool, in advertised order.
pub fn builtin_registry(ctx: &Arc<ToolContext>) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    vm::register(&mut registry, ctx)?;
    program::register(&mut registry, ctx)?;
    health::register(&mut registry, ctx)?;
    Ok(registry)
}

/// Routes JSON-RPC requests to the registry and reports each tool call
/// to the injected sink.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    sink: Arc<dyn InvocationSink>,
    tool_timeout: Duration,
    resources: Option<Arc<ToolContext>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        sink: Arc<dyn InvocationSink>,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sink,
            tool_timeout,
            resources: None,
        }
    }

    /// Serve the VM resources of `ctx` through `resources/list` and
    /// `resources/read`. Without it no resources are advertised.
    pub fn with_resources(mut self, ctx: Arc<ToolContext>) -> Self {
        self.resources = Some(ctx);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch a JSON-RPC request to the appropriate handler.
    ///
    /// Returns `None` for notifications (no response required).
    pub async fn dispatch(&self, req: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        match req.method.as_str() {
            "initialize" => {
                if let Some(params) = req
                    .params
                    .as_ref()
                    .and_then(|v| serde_json::from_value::<InitializeParams>(v.clone()).ok())
                {
                    let client = params.client_info.and_then(|c| c.name);
                    tracing::info!(
                        client = client.as_deref().unwrap_or("unknown"),
                        protocol = params.protocol_version.as_deref().unwrap_or("unspecified"),
                        "Client initializing"
                    );
                }
                let result = serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {
                        "tools": {},
                        "resources": {}
                    },
                    "serverInfo": {
                        "name": "mcp-vm-bridge",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                });
                Some(JsonRpcResponse::success(req.id.clone(), result))
            }

            "notifications/initialized" => None,

            "ping" => Some(JsonRpcResponse::success(req.id.clone(), serde_json::json!({}))),

            "tools/list" | "list_tools" => {
                let result = serde_json::json!({ "tools": self.registry.list() });
                Some(JsonRpcResponse::success(req.id.clone(), result))
            }

            "resources/list" => {
                let listed = if self.resources.is_some() {
                    resources::descriptors()
                } else {
                    Vec::new()
                };
                let result = serde_json::json!({ "resources": listed });
                Some(JsonRpcResponse::success(req.id.clone(), result))
            }

            "resources/read" => {
                let params: ResourceReadParams = match req
                    .params
                    .as_ref()
                    .map(|v| serde_json::from_value(v.clone()))
                {
                    Some(Ok(p)) => p,
                    Some(Err(e)) => {
                        return Some(JsonRpcResponse::error(
                            req.id.clone(),
                            JsonRpcError::invalid_params(format!(
                                "Invalid resources/read params: {e}"
                            )),
                        ));
                    }
                    None => {
                        return Some(JsonRpcResponse::error(
                            req.id.clone(),
                            JsonRpcError::invalid_params("Missing params for resources/read"),
                        ));
                    }
                };

                let outcome = match &self.resources {
                    Some(ctx) => resources::read(ctx, &params).await,
                    None => Err(JsonRpcError::invalid_params(format!(
                        "Unknown resource: {}",
                        params.uri
                    ))),
                };
                Some(match outcome {
                    Ok(result) => JsonRpcResponse::success(req.id.clone(), result),
                    Err(err) => {
                        tracing::debug!(uri = %params.uri, code = err.code, "Resource read failed");
                        JsonRpcResponse::error(req.id.clone(), err)
                    }
                })
            }

            "tools/call" | "call_tool" => {
                let params: ToolCallParams = match &req.params {
                    Some(v) => match serde_json::from_value(v.clone()) {
                        Ok(p) => p,
                        Err(e) => {
                            return Some(JsonRpcResponse::error(
                                req.id.clone(),
                                JsonRpcError::invalid_params(format!(
                                    "Invalid tools/call params: {e}"
                                )),
                            ));
                        }
                    },
                    None => {
                        return Some(JsonRpcResponse::error(
                            req.id.clone(),
                            JsonRpcError::invalid_params("Missing params for tools/call"),
                        ));
                    }
                };

                let tool_result = self.call_tool(&params).await;
                Some(JsonRpcResponse::tool(req.id.clone(), &tool_result))
            }

            _ => Some(JsonRpcResponse::error(
                req.id.clone(),
                JsonRpcError::method_not_found(&req.method),
            )),
        }
    }

    /// Invoke a tool under the configured timeout. Never fails: errors come
    /// back as `isError` results.
    pub async fn call_tool(&self, params: &ToolCallParams) -> ToolResult {
        let started = Instant::now();
        let invocation = self
            .registry
            .invoke(&params.name, params.arguments.clone());

        let outcome = match tokio::time::timeout(self.tool_timeout, invocation).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::TimedOut {
                tool: params.name.clone(),
                after: self.tool_timeout,
            }),
        };

        let (result, logged) = match outcome {
            Ok(value) => (ToolResult::json(&value), InvocationOutcome::Success),
            Err(err) => {
                let mcp = McpErrorResponse::from(&err);
                let logged = InvocationOutcome::Failed {
                    code: mcp.error.code.as_str().to_string(),
                    message: mcp.error.message.clone(),
                };
                (mcp.into(), logged)
            }
        };

        self.sink.record(&InvocationEvent {
            tool: params.name.clone(),
            outcome: logged,
            elapsed: started.elapsed(),
        });
        result
    }

    /// Report a handler that died without producing a result.
    pub fn record_panic(&self, tool: &str, elapsed: Duration) -> ToolResult {
        let err = ToolError::Internal(format!("handler for {tool} panicked"));
        let mcp = McpErrorResponse::from(&err);
        self.sink.record(&InvocationEvent {
            tool: tool.to_string(),
            outcome: InvocationOutcome::Failed {
                code: mcp.error.code.as_str().to_string(),
                message: mcp.error.message.clone(),
            },
            elapsed,
        });
        mcp.into()
    }
}

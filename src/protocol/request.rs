use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 ID: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    Str(String),
}

/// JSON-RPC 2.0 request envelope. Requests without an `id` are notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RpcId, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: None,
            method: method.into(),
            params: None,
        }
    }
}

/// MCP `initialize` params.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(rename = "clientInfo")]
    pub client_info: Option<ClientInfo>,
}

/// Client information sent during `initialize`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// Parameters for `tools/call`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Option<serde_json::Value>,
}

/// Optional VM sizing overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VmConfigParams {
    pub memory_size: Option<u64>,
    pub stack_size: Option<u64>,
    pub history_limit: Option<u64>,
}

/// Parameters for the `initialize_vm` tool.
///
/// Sizing may be given inline or under `config`; `config` wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeVmParams {
    #[serde(default)]
    pub config: Option<VmConfigParams>,
    #[serde(flatten)]
    pub inline: VmConfigParams,
}

/// Parameters for the `execute_vm_step` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteStepParams {
    pub instruction: String,
}

/// Parameters for the `run_uor_program` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct RunProgramParams {
    pub program: String,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// Parameters for the `provide_vm_input` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvideInputParams {
    pub value: i64,
}

/// Parameters for the `vm_instruction_trace` tool.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstructionTraceParams {
    #[serde(default)]
    pub limit: Option<u64>,
}

/// Tools that take no arguments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoParams {}

/// Parameters for `resources/read`. `offset` and `length` window `vm://memory`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceReadParams {
    pub uri: String,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub length: Option<u64>,
}

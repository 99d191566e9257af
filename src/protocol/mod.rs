pub mod request;
pub mod response;

pub use request::{
    ClientInfo, ExecuteStepParams, InitializeParams, InitializeVmParams, InstructionTraceParams,
    JsonRpcRequest, NoParams, ProvideInputParams, ResourceReadParams, RpcId, RunProgramParams,
    ToolCallParams, VmConfigParams,
};
pub use response::{
    JsonRpcError, JsonRpcResponse, McpError, McpErrorCode, McpErrorResponse, ToolResult,
    ToolResultContent,
};

/// Protocol revision announced during the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

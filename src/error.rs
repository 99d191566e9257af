use std::time::Duration;

use crate::engine::EngineError;
use crate::protocol::{McpErrorCode, McpErrorResponse, ToolResult};

/// Failure of a single tool invocation.
///
/// The dispatcher turns every variant into an `isError` tool result; none of
/// them end the server.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {detail}")]
    InvalidArguments { tool: String, detail: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Upstream request failed: {0}")]
    Upstream(String),
    #[error("Tool {tool} timed out after {} ms", after.as_millis())]
    TimedOut { tool: String, after: Duration },
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn invalid_arguments(tool: &str, detail: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> McpErrorCode {
        match self {
            Self::UnknownTool(_) => McpErrorCode::UnknownTool,
            Self::InvalidArguments { .. } => McpErrorCode::InvalidArguments,
            Self::Engine(EngineError::NotInitialized) => McpErrorCode::EngineNotInitialized,
            Self::Engine(EngineError::InvalidConfig(_)) => McpErrorCode::InvalidConfig,
            Self::Engine(_) => McpErrorCode::EngineError,
            Self::Upstream(_) => McpErrorCode::UpstreamError,
            Self::TimedOut { .. } => McpErrorCode::Timeout,
            Self::Serialization(_) | Self::Internal(_) => McpErrorCode::InternalError,
        }
    }
}

impl From<&ToolError> for McpErrorResponse {
    fn from(err: &ToolError) -> Self {
        McpErrorResponse::new(err.code(), err.to_string())
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        McpErrorResponse::from(&err).into()
    }
}

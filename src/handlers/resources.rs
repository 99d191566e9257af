//! Read-only VM resources served through `resources/list` and `resources/read`.

use serde::Serialize;
use serde_json::{json, Value};

use crate::engine::EngineError;
use crate::protocol::{JsonRpcError, ResourceReadParams};

use super::ToolContext;

/// Records served by `vm://execution_trace`.
const TRACE_RESOURCE_LIMIT: usize = 100;

const MIME_JSON: &str = "application/json";

/// Public description of a resource, as returned by `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDescriptor {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
}

/// VM resources in advertised order.
pub fn descriptors() -> Vec<ResourceDescriptor> {
    vec![
        ResourceDescriptor {
            uri: "vm://state",
            name: "VM State",
            description: "Registers, flags, stack and usage counters of the current VM",
            mime_type: MIME_JSON,
        },
        ResourceDescriptor {
            uri: "vm://execution_trace",
            name: "VM Execution Trace",
            description: "Most recent execution records, oldest first",
            mime_type: MIME_JSON,
        },
        ResourceDescriptor {
            uri: "vm://memory",
            name: "VM Memory",
            description: "Memory cells; `offset` and `length` select a window",
            mime_type: MIME_JSON,
        },
    ]
}

/// Resolve a `resources/read` request into its `contents` result.
pub async fn read(ctx: &ToolContext, params: &ResourceReadParams) -> Result<Value, JsonRpcError> {
    let body = match params.uri.as_str() {
        "vm://state" => serialize(ctx.session.report().await.map_err(unavailable)?)?,
        "vm://execution_trace" => {
            let (records, history_length, executed) = ctx
                .session
                .trace(TRACE_RESOURCE_LIMIT)
                .await
                .map_err(unavailable)?;
            json!({
                "records": records,
                "history_length": history_length,
                "instructions_executed": executed,
            })
        }
        "vm://memory" => {
            let offset = to_usize("offset", params.offset.unwrap_or(0))?;
            let length = params.length.map(|l| to_usize("length", l)).transpose()?;
            let view = ctx
                .session
                .memory(offset, length)
                .await
                .map_err(unavailable)?
                .ok_or_else(|| {
                    JsonRpcError::invalid_params(format!("memory offset {offset} out of range"))
                })?;
            serialize(view)?
        }
        other => {
            return Err(JsonRpcError::invalid_params(format!("Unknown resource: {other}")));
        }
    };

    Ok(json!({
        "contents": [{
            "uri": params.uri,
            "mimeType": MIME_JSON,
            "text": body.to_string(),
        }]
    }))
}

fn serialize<T: Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

fn to_usize(field: &str, value: u64) -> Result<usize, JsonRpcError> {
    usize::try_from(value)
        .map_err(|_| JsonRpcError::invalid_params(format!("{field} is too large: {value}")))
}

fn unavailable(err: EngineError) -> JsonRpcError {
    JsonRpcError::resource_unavailable(err.to_string())
}

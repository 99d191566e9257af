use std::sync::Arc;

use serde_json::{json, Value};

use crate::engine::{EngineError, VmConfig};
use crate::error::ToolError;
use crate::protocol::{
    ExecuteStepParams, InitializeVmParams, InstructionTraceParams, NoParams, ProvideInputParams,
    VmConfigParams,
};
use crate::registry::{typed, RegistryError, ToolDescriptor, ToolRegistry};

use super::ToolContext;

/// Records returned by `vm_instruction_trace` when no limit is given.
const DEFAULT_TRACE_LIMIT: usize = 20;

pub fn register(registry: &mut ToolRegistry, ctx: &Arc<ToolContext>) -> Result<(), RegistryError> {
    let c = Arc::clone(ctx);
    registry.register(
        initialize_vm_descriptor(),
        typed("initialize_vm", move |p: InitializeVmParams| {
            let c = Arc::clone(&c);
            async move { initialize_vm(&c, p).await }
        }),
    )?;

    let c = Arc::clone(ctx);
    registry.register(
        ToolDescriptor::new(
            "execute_vm_step",
            "Execute one instruction on the VM and return the execution record",
            json!({
                "type": "object",
                "required": ["instruction"],
                "properties": {
                    "instruction": {
                        "type": "string",
                        "description": "Instruction text, e.g. \"LOAD 42\" or \"ADD 8\""
                    }
                }
            }),
        ),
        typed("execute_vm_step", move |p: ExecuteStepParams| {
            let c = Arc::clone(&c);
            async move { execute_step(&c, p).await }
        }),
    )?;

    let c = Arc::clone(ctx);
    registry.register(
        ToolDescriptor::new(
            "provide_vm_input",
            "Push an input value onto the VM stack",
            json!({
                "type": "object",
                "required": ["value"],
                "properties": {
                    "value": { "type": "integer", "description": "Value to push" }
                }
            }),
        ),
        typed("provide_vm_input", move |p: ProvideInputParams| {
            let c = Arc::clone(&c);
            async move { provide_input(&c, p).await }
        }),
    )?;

    let c = Arc::clone(ctx);
    registry.register(
        ToolDescriptor::new(
            "analyze_vm_state",
            "Report registers, flags, stack, memory usage and history size",
            json!({ "type": "object", "properties": {} }),
        ),
        typed("analyze_vm_state", move |_: NoParams| {
            let c = Arc::clone(&c);
            async move { analyze_state(&c).await }
        }),
    )?;

    let c = Arc::clone(ctx);
    registry.register(
        ToolDescriptor::new(
            "vm_instruction_trace",
            "Return the most recent execution records, oldest first",
            json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Maximum records to return (default 20)"
                    }
                }
            }),
        ),
        typed("vm_instruction_trace", move |p: InstructionTraceParams| {
            let c = Arc::clone(&c);
            async move { instruction_trace(&c, p).await }
        }),
    )?;

    Ok(())
}

fn vm_config_properties() -> Value {
    json!({
        "memory_size": {
            "type": "integer",
            "minimum": 1,
            "maximum": crate::engine::state::MAX_MEMORY_SIZE,
            "description": "Number of memory cells (default 1024)"
        },
        "stack_size": {
            "type": "integer",
            "minimum": 1,
            "description": "Stack capacity (default 256)"
        },
        "history_limit": {
            "type": "integer",
            "minimum": 1,
            "description": "Execution records retained before the oldest is evicted"
        }
    })
}

fn initialize_vm_descriptor() -> ToolDescriptor {
    let mut properties = vm_config_properties();
    if let Some(map) = properties.as_object_mut() {
        map.insert(
            "config".into(),
            json!({
                "type": "object",
                "properties": vm_config_properties()
            }),
        );
    }
    ToolDescriptor::new(
        "initialize_vm",
        "Create a fresh VM session, discarding any previous state and history",
        json!({ "type": "object", "properties": properties }),
    )
}

/// Layer inline sizing, then `config`, over the server defaults.
pub fn resolve_config(params: &InitializeVmParams, defaults: &VmConfig) -> Result<VmConfig, ToolError> {
    let mut config = defaults.clone();
    apply_overrides(&mut config, &params.inline)?;
    if let Some(nested) = &params.config {
        apply_overrides(&mut config, nested)?;
    }
    Ok(config)
}

fn apply_overrides(config: &mut VmConfig, params: &VmConfigParams) -> Result<(), ToolError> {
    let to_usize = |field: &str, v: u64| {
        usize::try_from(v)
            .map_err(|_| EngineError::InvalidConfig(format!("{field} is too large: {v}")))
    };
    if let Some(v) = params.memory_size {
        config.memory_size = to_usize("memory_size", v)?;
    }
    if let Some(v) = params.stack_size {
        config.stack_size = to_usize("stack_size", v)?;
    }
    if let Some(v) = params.history_limit {
        config.history_limit = to_usize("history_limit", v)?;
    }
    Ok(())
}

async fn initialize_vm(ctx: &ToolContext, params: InitializeVmParams) -> Result<Value, ToolError> {
    let config = resolve_config(&params, &ctx.default_vm)?;
    let vm = ctx.session.initialize(config).await?;
    tracing::info!(vm_id = %vm.vm_id, memory_size = vm.config.memory_size, "VM initialized");
    Ok(serde_json::to_value(vm)?)
}

async fn execute_step(ctx: &ToolContext, params: ExecuteStepParams) -> Result<Value, ToolError> {
    let outcome = ctx.session.execute(&params.instruction).await?;
    tracing::debug!(
        instruction = %outcome.execution_result.instruction,
        result = %outcome.execution_result.result,
        "VM step"
    );
    Ok(serde_json::to_value(outcome)?)
}

async fn provide_input(ctx: &ToolContext, params: ProvideInputParams) -> Result<Value, ToolError> {
    let (depth, registers) = ctx.session.provide_input(params.value).await?;
    Ok(json!({
        "accepted": true,
        "stack_depth": depth,
        "registers": registers,
    }))
}

async fn analyze_state(ctx: &ToolContext) -> Result<Value, ToolError> {
    let report = ctx.session.report().await?;
    Ok(serde_json::to_value(report)?)
}

async fn instruction_trace(
    ctx: &ToolContext,
    params: InstructionTraceParams,
) -> Result<Value, ToolError> {
    let limit = params
        .limit
        .map_or(DEFAULT_TRACE_LIMIT, |l| usize::try_from(l).unwrap_or(usize::MAX));
    let (records, history_length, executed) = ctx.session.trace(limit).await?;
    Ok(json!({
        "records": records,
        "history_length": history_length,
        "instructions_executed": executed,
    }))
}

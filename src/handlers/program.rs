use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::program::{self, DEFAULT_MAX_STEPS};
use crate::engine::{Engine, Program, VmConfig};
use crate::error::ToolError;
use crate::protocol::RunProgramParams;
use crate::registry::{typed, RegistryError, ToolDescriptor, ToolRegistry};

use super::ToolContext;

/// Hard ceiling on `max_steps` for a local run.
const MAX_PROGRAM_STEPS: u64 = 1_000_000;

/// Recognized keys of the free-form `parameters` object for local runs.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LocalRunOptions {
    memory_size: Option<u64>,
    stack_size: Option<u64>,
    max_steps: Option<u64>,
    trace: bool,
}

pub fn register(registry: &mut ToolRegistry, ctx: &Arc<ToolContext>) -> Result<(), RegistryError> {
    let c = Arc::clone(ctx);
    registry.register(
        ToolDescriptor::new(
            "run_uor_program",
            "Run a whole program on a scratch VM (or the configured backend); \
             execution_time is in milliseconds",
            json!({
                "type": "object",
                "required": ["program"],
                "properties": {
                    "program": {
                        "type": "string",
                        "description": "Instructions separated by newlines or ';'. '#' starts a comment"
                    },
                    "parameters": {
                        "type": "object",
                        "description": "memory_size, stack_size, max_steps, trace; forwarded verbatim to the backend"
                    }
                }
            }),
        ),
        typed("run_uor_program", move |p: RunProgramParams| {
            let c = Arc::clone(&c);
            async move { run_program(&c, p).await }
        }),
    )
}

async fn run_program(ctx: &ToolContext, params: RunProgramParams) -> Result<Value, ToolError> {
    let parameters = params
        .parameters
        .unwrap_or_else(|| Value::Object(Default::default()));
    let started = Instant::now();

    let result = match &ctx.upstream {
        Some(upstream) => upstream.run_program(&params.program, &parameters).await?,
        None => run_locally(params.program, parameters, ctx.default_vm.clone()).await?,
    };

    Ok(json!({
        "result": result,
        "execution_time": started.elapsed().as_secs_f64() * 1000.0,
    }))
}

async fn run_locally(
    source: String,
    parameters: Value,
    defaults: VmConfig,
) -> Result<Value, ToolError> {
    let options: LocalRunOptions = serde_json::from_value(parameters)
        .map_err(|e| ToolError::invalid_arguments("run_uor_program", e.to_string()))?;

    let program = Program::parse(&source);
    if program.is_empty() {
        return Err(ToolError::invalid_arguments(
            "run_uor_program",
            "program contains no instructions",
        ));
    }

    let mut config = defaults;
    if let Some(size) = options.memory_size {
        config.memory_size = usize::try_from(size).unwrap_or(usize::MAX);
    }
    if let Some(size) = options.stack_size {
        config.stack_size = usize::try_from(size).unwrap_or(usize::MAX);
    }
    let max_steps = options
        .max_steps
        .map_or(DEFAULT_MAX_STEPS, |s| s.min(MAX_PROGRAM_STEPS) as usize);
    let trace = options.trace;

    // The interpreter is synchronous; keep it off the async workers.
    let task = tokio::task::spawn_blocking(move || {
        let mut engine = Engine::new(config)?;
        let report = program::run(&mut engine, &program, max_steps, trace);
        Ok::<_, ToolError>(report)
    });

    let report = task.await.map_err(|e| {
        tracing::error!("Program task join error: {e}");
        ToolError::Internal("program run aborted".into())
    })??;

    tracing::debug!(steps = report.steps, stop = ?report.stop_reason, "program finished");
    Ok(serde_json::to_value(report)?)
}

//! Per-invocation logging sink injected into the dispatcher.

use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Success,
    /// Carries the structured error code and message returned to the caller.
    Failed { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationEvent {
    pub tool: String,
    pub outcome: InvocationOutcome,
    pub elapsed: Duration,
}

impl InvocationEvent {
    pub fn is_success(&self) -> bool {
        self.outcome == InvocationOutcome::Success
    }
}

pub trait InvocationSink: Send + Sync {
    fn record(&self, event: &InvocationEvent);
}

/// Default sink: one `tracing` event per invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl InvocationSink for TracingSink {
    fn record(&self, event: &InvocationEvent) {
        let elapsed_ms = event.elapsed.as_millis() as u64;
        match &event.outcome {
            InvocationOutcome::Success => {
                tracing::info!(tool = %event.tool, elapsed_ms, "tool call succeeded");
            }
            InvocationOutcome::Failed { code, message } => {
                tracing::warn!(tool = %event.tool, elapsed_ms, code = %code, "tool call failed: {message}");
            }
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<InvocationEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InvocationEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl InvocationSink for MemorySink {
    fn record(&self, event: &InvocationEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

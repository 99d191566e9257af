use tokio::sync::Mutex;

use super::machine::{Engine, StateReport, StepOutcome};
use super::state::{ExecutionRecord, MachineSnapshot, Registers, VmConfig};
use super::EngineError;

/// Result of (re)initializing a session.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InitializedVm {
    pub vm_id: String,
    pub config: VmConfig,
    pub initial_state: MachineSnapshot,
}

/// A window of VM memory.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MemoryView {
    pub memory_size: usize,
    pub offset: usize,
    pub cells: Vec<i64>,
}

/// The single VM state served by one server process.
///
/// Every operation holds the lock for its whole duration, so concurrent
/// tool calls are applied one at a time in lock-acquisition order.
#[derive(Default)]
pub struct VmSession {
    engine: Mutex<Option<Engine>>,
}

impl VmSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any existing state (and its history) with a fresh engine.
    pub async fn initialize(&self, config: VmConfig) -> Result<InitializedVm, EngineError> {
        let engine = Engine::new(config)?;
        let initialized = InitializedVm {
            vm_id: engine.vm_id().to_string(),
            config: engine.config().clone(),
            initial_state: engine.snapshot(),
        };

        let mut slot = self.engine.lock().await;
        if let Some(previous) = slot.as_ref() {
            tracing::info!(
                previous = previous.vm_id(),
                discarded_records = previous.history_len(),
                "Re-initializing VM"
            );
        }
        *slot = Some(engine);
        Ok(initialized)
    }

    pub async fn is_initialized(&self) -> bool {
        self.engine.lock().await.is_some()
    }

    pub async fn execute(&self, instruction: &str) -> Result<StepOutcome, EngineError> {
        let mut slot = self.engine.lock().await;
        let engine = slot.as_mut().ok_or(EngineError::NotInitialized)?;
        Ok(engine.step(instruction))
    }

    /// Push a value onto the VM stack. Returns the new stack depth and registers.
    pub async fn provide_input(&self, value: i64) -> Result<(usize, Registers), EngineError> {
        let mut slot = self.engine.lock().await;
        let engine = slot.as_mut().ok_or(EngineError::NotInitialized)?;
        let depth = engine.push_input(value)?;
        Ok((depth, engine.registers()))
    }

    pub async fn report(&self) -> Result<StateReport, EngineError> {
        let slot = self.engine.lock().await;
        let engine = slot.as_ref().ok_or(EngineError::NotInitialized)?;
        Ok(engine.report())
    }

    /// Memory cells from `offset`, at most `length` of them (all remaining by
    /// default). `None` when `offset` lies past the end of memory.
    pub async fn memory(
        &self,
        offset: usize,
        length: Option<usize>,
    ) -> Result<Option<MemoryView>, EngineError> {
        let slot = self.engine.lock().await;
        let engine = slot.as_ref().ok_or(EngineError::NotInitialized)?;
        let memory = engine.memory();
        let Some(tail) = memory.get(offset..) else {
            return Ok(None);
        };
        let take = length.map_or(tail.len(), |l| l.min(tail.len()));
        Ok(Some(MemoryView {
            memory_size: memory.len(),
            offset,
            cells: tail[..take].to_vec(),
        }))
    }

    /// Recent history plus the retained and lifetime instruction counts.
    pub async fn trace(
        &self,
        limit: usize,
    ) -> Result<(Vec<ExecutionRecord>, usize, u64), EngineError> {
        let slot = self.engine.lock().await;
        let engine = slot.as_ref().ok_or(EngineError::NotInitialized)?;
        Ok((
            engine.recent_history(limit),
            engine.history_len(),
            engine.instructions_executed(),
        ))
    }
}

//! Register-machine interpreter backing the VM tools.
//!
//! An [`Engine`] holds one VM state and its execution history. Sessions
//! served over the wire go through [`VmSession`], which serializes access.

pub mod instruction;
pub mod machine;
pub mod program;
pub mod session;
pub mod state;

pub use machine::{Engine, StateReport, StepOutcome};
pub use program::{Program, ProgramReport, StopReason};
pub use session::{InitializedVm, MemoryView, VmSession};
pub use state::{
    ExecutionRecord, Flags, MachineSnapshot, Register, Registers, StepStatus, VmConfig,
};

/// Magnitude above which arithmetic sets the overflow flag.
///
/// Fixed design constant; it does not follow the configured memory size.
pub const OVERFLOW_BOUND: i64 = 255;

/// `CONSCIOUS` counts Z modulo this value.
pub const CONSCIOUSNESS_MODULUS: i64 = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("VM not initialized: call initialize_vm first")]
    NotInitialized,
    #[error("Invalid VM configuration: {0}")]
    InvalidConfig(String),
    #[error("VM stack is full (capacity {0})")]
    StackFull(usize),
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EngineError;

/// Default memory cells allocated when no size is configured.
pub const DEFAULT_MEMORY_SIZE: usize = 1024;

/// Largest memory array a session may request.
pub const MAX_MEMORY_SIZE: usize = 1 << 20;

/// Default stack capacity.
pub const DEFAULT_STACK_SIZE: usize = 256;

/// Default number of execution records retained per session.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// Register file of the machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct Registers {
    pub pc: i64,
    pub sp: i64,
    pub acc: i64,
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

/// Named register, used by operands and `MOV` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Pc,
    Sp,
    Acc,
    X,
    Y,
    Z,
}

impl Register {
    /// Case-insensitive lookup by register name.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "PC" => Some(Self::Pc),
            "SP" => Some(Self::Sp),
            "ACC" => Some(Self::Acc),
            "X" => Some(Self::X),
            "Y" => Some(Self::Y),
            "Z" => Some(Self::Z),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pc => "PC",
            Self::Sp => "SP",
            Self::Acc => "ACC",
            Self::X => "X",
            Self::Y => "Y",
            Self::Z => "Z",
        }
    }
}

impl Registers {
    pub fn get(&self, register: Register) -> i64 {
        match register {
            Register::Pc => self.pc,
            Register::Sp => self.sp,
            Register::Acc => self.acc,
            Register::X => self.x,
            Register::Y => self.y,
            Register::Z => self.z,
        }
    }

    pub fn set(&mut self, register: Register, value: i64) {
        match register {
            Register::Pc => self.pc = value,
            Register::Sp => self.sp = value,
            Register::Acc => self.acc = value,
            Register::X => self.x = value,
            Register::Y => self.y = value,
            Register::Z => self.z = value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub zero: bool,
    pub carry: bool,
    pub overflow: bool,
    pub consciousness: bool,
}

/// Registers and flags captured around a single instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub registers: Registers,
    pub flags: Flags,
}

/// How an instruction was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Executed,
    /// Opcode not recognized; nothing changed.
    Unknown,
    /// Instruction decoded but could not be applied; nothing changed.
    Fault,
    Halted,
}

/// Audit entry for one accepted instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub instruction: String,
    pub timestamp: DateTime<Utc>,
    pub state_before: MachineSnapshot,
    pub state_after: MachineSnapshot,
    pub result: String,
    pub status: StepStatus,
}

/// Session sizing. Validated by [`VmConfig::validate`] before an engine is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    pub memory_size: usize,
    pub stack_size: usize,
    pub history_limit: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            stack_size: DEFAULT_STACK_SIZE,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl VmConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.memory_size == 0 || self.memory_size > MAX_MEMORY_SIZE {
            return Err(EngineError::InvalidConfig(format!(
                "memory_size must be between 1 and {MAX_MEMORY_SIZE}, got {}",
                self.memory_size
            )));
        }
        if self.stack_size == 0 {
            return Err(EngineError::InvalidConfig(
                "stack_size must be at least 1".into(),
            ));
        }
        if self.history_limit == 0 {
            return Err(EngineError::InvalidConfig(
                "history_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

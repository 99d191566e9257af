use std::collections::VecDeque;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::instruction::{decode, Decoded, Instruction, Opcode, Operand};
use super::state::{
    ExecutionRecord, Flags, MachineSnapshot, Register, Registers, StepStatus, VmConfig,
};
use super::{EngineError, CONSCIOUSNESS_MODULUS, OVERFLOW_BOUND};

/// Reasons an instruction could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
enum Fault {
    #[error("memory address {address} out of range (size {size})")]
    AddressOutOfRange { address: i64, size: usize },
    #[error("stack overflow (capacity {capacity})")]
    StackOverflow { capacity: usize },
    #[error("stack underflow")]
    StackUnderflow,
    #[error("invalid register target '{0}'")]
    InvalidTarget(String),
}

enum StackEffect {
    None,
    Push(i64),
    Pop,
}

/// Fully computed next state, committed in one step.
struct Transition {
    registers: Registers,
    flags: Flags,
    memory_write: Option<(usize, i64)>,
    stack: StackEffect,
    status: StepStatus,
    summary: String,
}

/// Result of one `execute` call, as returned to tool callers.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub execution_result: ExecutionRecord,
    pub registers: Registers,
    pub flags: Flags,
    pub history_length: usize,
}

/// Read-only view of a session for inspection tools.
#[derive(Debug, Clone, Serialize)]
pub struct StateReport {
    pub vm_id: String,
    pub config: VmConfig,
    pub registers: Registers,
    pub flags: Flags,
    pub stack: Vec<i64>,
    pub memory_size: usize,
    pub memory_in_use: usize,
    pub history_length: usize,
    pub instructions_executed: u64,
}

pub struct Engine {
    vm_id: String,
    config: VmConfig,
    registers: Registers,
    flags: Flags,
    memory: Vec<i64>,
    stack: Vec<i64>,
    history: VecDeque<ExecutionRecord>,
    executed: u64,
}

impl Engine {
    /// Build a zeroed machine. Fails if the config is out of bounds.
    pub fn new(config: VmConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            vm_id: Uuid::new_v4().to_string(),
            memory: vec![0; config.memory_size],
            stack: Vec::with_capacity(config.stack_size.min(1024)),
            history: VecDeque::new(),
            registers: Registers::default(),
            flags: Flags::default(),
            executed: 0,
            config,
        })
    }

    pub fn vm_id(&self) -> &str {
        &self.vm_id
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn registers(&self) -> Registers {
        self.registers
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            registers: self.registers,
            flags: self.flags,
        }
    }

    pub fn memory(&self) -> &[i64] {
        &self.memory
    }

    pub fn stack(&self) -> &[i64] {
        &self.stack
    }

    pub fn history(&self) -> impl ExactSizeIterator<Item = &ExecutionRecord> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Total accepted instructions, including records already evicted.
    pub fn instructions_executed(&self) -> u64 {
        self.executed
    }

    /// Decode and apply one instruction, appending its record to the history.
    ///
    /// Unknown opcodes and runtime faults are recorded with unchanged state
    /// rather than returned as errors.
    pub fn execute(&mut self, text: &str) -> ExecutionRecord {
        let before = self.snapshot();

        let (status, result) = match decode(text) {
            Decoded::Unknown(opcode) => (
                StepStatus::Unknown,
                format!("Unknown instruction: {opcode}"),
            ),
            Decoded::Known(instruction) => match self.transition(&instruction) {
                Ok(next) => {
                    let status = next.status;
                    let summary = self.commit(next);
                    (status, summary)
                }
                Err(fault) => (StepStatus::Fault, format!("Fault: {fault}")),
            },
        };

        let record = ExecutionRecord {
            instruction: text.trim().to_string(),
            timestamp: Utc::now(),
            state_before: before,
            state_after: self.snapshot(),
            result,
            status,
        };
        self.append(record.clone());
        record
    }

    /// Execute and package the outcome the way `execute_vm_step` reports it.
    pub fn step(&mut self, text: &str) -> StepOutcome {
        let record = self.execute(text);
        StepOutcome {
            execution_result: record,
            registers: self.registers,
            flags: self.flags,
            history_length: self.history.len(),
        }
    }

    /// Push an externally supplied value onto the stack.
    ///
    /// The push is recorded in the history as `INPUT <value>` so SP changes
    /// stay visible to the record chain. A full stack is rejected unrecorded.
    pub fn push_input(&mut self, value: i64) -> Result<usize, EngineError> {
        if self.stack.len() >= self.config.stack_size {
            return Err(EngineError::StackFull(self.config.stack_size));
        }
        let before = self.snapshot();
        self.stack.push(value);
        self.registers.sp = self.stack.len() as i64;

        self.append(ExecutionRecord {
            instruction: format!("INPUT {value}"),
            timestamp: Utc::now(),
            state_before: before,
            state_after: self.snapshot(),
            result: format!("Input {value} pushed"),
            status: StepStatus::Executed,
        });
        Ok(self.stack.len())
    }

    pub fn report(&self) -> StateReport {
        StateReport {
            vm_id: self.vm_id.clone(),
            config: self.config.clone(),
            registers: self.registers,
            flags: self.flags,
            stack: self.stack.clone(),
            memory_size: self.memory.len(),
            memory_in_use: self.memory.iter().filter(|cell| **cell != 0).count(),
            history_length: self.history.len(),
            instructions_executed: self.executed,
        }
    }

    /// The most recent `limit` records, oldest first.
    pub fn recent_history(&self, limit: usize) -> Vec<ExecutionRecord> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    fn append(&mut self, record: ExecutionRecord) {
        if self.history.len() == self.config.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(record);
        self.executed += 1;
    }

    fn commit(&mut self, next: Transition) -> String {
        if let Some((address, value)) = next.memory_write {
            self.memory[address] = value;
        }
        match next.stack {
            StackEffect::None => {}
            StackEffect::Push(value) => self.stack.push(value),
            StackEffect::Pop => {
                self.stack.pop();
            }
        }
        self.registers = next.registers;
        self.flags = next.flags;
        next.summary
    }

    fn address(&self, operand: Option<Operand>, registers: &Registers) -> Result<usize, Fault> {
        let address = operand.map_or(0, |op| op.resolve(registers));
        usize::try_from(address)
            .ok()
            .filter(|a| *a < self.memory.len())
            .ok_or(Fault::AddressOutOfRange {
                address,
                size: self.memory.len(),
            })
    }

    /// Compute the next state from copies of the current registers and flags.
    fn transition(&self, instruction: &Instruction) -> Result<Transition, Fault> {
        let mut regs = self.registers;
        let mut flags = self.flags;
        let mut memory_write = None;
        let mut stack = StackEffect::None;
        let mut status = StepStatus::Executed;
        let mut advance = true;

        let value_or = |index: usize, fallback: i64| {
            instruction
                .operand(index)
                .map_or(fallback, |op| op.resolve(&self.registers))
        };

        let summary = match instruction.opcode {
            Opcode::Load => {
                regs.acc = value_or(0, 0);
                flags.zero = regs.acc == 0;
                format!("ACC = {}", regs.acc)
            }
            Opcode::Fetch => {
                let address = self.address(instruction.operand(0), &self.registers)?;
                regs.acc = self.memory[address];
                flags.zero = regs.acc == 0;
                format!("ACC = memory[{address}] = {}", regs.acc)
            }
            Opcode::Store => {
                let address = self.address(instruction.operand(0), &self.registers)?;
                memory_write = Some((address, regs.acc));
                format!("memory[{address}] = {}", regs.acc)
            }
            Opcode::Add => {
                regs.acc = regs.acc.wrapping_add(value_or(0, self.registers.x));
                arithmetic_flags(&mut flags, regs.acc, regs.acc > OVERFLOW_BOUND);
                format!("ACC = {}", regs.acc)
            }
            Opcode::Sub => {
                regs.acc = regs.acc.wrapping_sub(value_or(0, self.registers.x));
                arithmetic_flags(&mut flags, regs.acc, regs.acc < 0);
                format!("ACC = {}", regs.acc)
            }
            Opcode::Mul => {
                regs.acc = regs.acc.wrapping_mul(value_or(0, self.registers.x));
                arithmetic_flags(&mut flags, regs.acc, regs.acc > OVERFLOW_BOUND);
                format!("ACC = {}", regs.acc)
            }
            Opcode::Mov => {
                let target = match instruction.operand(0) {
                    Some(Operand::Register(
                        r @ (Register::Acc | Register::X | Register::Y | Register::Z),
                    )) => r,
                    _ => {
                        let token = instruction.tokens.first().cloned().unwrap_or_default();
                        return Err(Fault::InvalidTarget(token));
                    }
                };
                let value = value_or(1, 0);
                regs.set(target, value);
                format!("{} = {value}", target.name())
            }
            Opcode::Jmp => {
                regs.pc = value_or(0, 0);
                advance = false;
                format!("Jumped to {}", regs.pc)
            }
            Opcode::Jz => {
                if flags.zero {
                    regs.pc = value_or(0, 0);
                    advance = false;
                    format!("Zero set, jumped to {}", regs.pc)
                } else {
                    "Zero clear, no jump".to_string()
                }
            }
            Opcode::Push => {
                if self.stack.len() >= self.config.stack_size {
                    return Err(Fault::StackOverflow {
                        capacity: self.config.stack_size,
                    });
                }
                let value = value_or(0, self.registers.acc);
                stack = StackEffect::Push(value);
                regs.sp = self.stack.len() as i64 + 1;
                format!("Pushed {value}")
            }
            Opcode::Pop => {
                let value = *self.stack.last().ok_or(Fault::StackUnderflow)?;
                stack = StackEffect::Pop;
                regs.sp = self.stack.len() as i64 - 1;
                regs.acc = value;
                flags.zero = value == 0;
                format!("Popped {value} into ACC")
            }
            Opcode::Conscious => {
                regs.z = regs.z.wrapping_add(1).rem_euclid(CONSCIOUSNESS_MODULUS);
                flags.consciousness = true;
                format!("Consciousness level Z = {}", regs.z)
            }
            Opcode::Nop => "No operation".to_string(),
            Opcode::Halt => {
                status = StepStatus::Halted;
                advance = false;
                "Halted".to_string()
            }
        };

        if advance {
            regs.pc = regs.pc.wrapping_add(1);
        }

        Ok(Transition {
            registers: regs,
            flags,
            memory_write,
            stack,
            status,
            summary,
        })
    }
}

fn arithmetic_flags(flags: &mut Flags, acc: i64, carry: bool) {
    flags.zero = acc == 0;
    flags.overflow = acc.unsigned_abs() > OVERFLOW_BOUND as u64;
    flags.carry = carry;
}

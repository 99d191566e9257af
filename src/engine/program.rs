use serde::Serialize;

use super::machine::Engine;
use super::state::{ExecutionRecord, MachineSnapshot, StepStatus};

/// Default instruction budget for one program run.
pub const DEFAULT_MAX_STEPS: usize = 10_000;

/// A program as an ordered list of instruction lines; PC indexes into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<String>,
}

impl Program {
    /// Split source on newlines and `;`, dropping blanks and `#` comments.
    pub fn parse(source: &str) -> Self {
        let instructions = source
            .split(|c: char| c == '\n' || c == ';')
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { instructions }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, pc: i64) -> Option<&str> {
        usize::try_from(pc)
            .ok()
            .and_then(|i| self.instructions.get(i))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfProgram,
    Halted,
    UnknownInstruction,
    Fault,
    StepLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgramReport {
    pub stop_reason: StopReason,
    pub steps: usize,
    pub final_state: MachineSnapshot,
    pub stack: Vec<i64>,
    /// Result line of the last executed instruction.
    pub last_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<ExecutionRecord>>,
}

/// Run `program` on `engine`, fetching the instruction at PC each step.
pub fn run(engine: &mut Engine, program: &Program, max_steps: usize, trace: bool) -> ProgramReport {
    let mut steps = 0;
    let mut last_result = None;

    let stop_reason = loop {
        let Some(text) = program.get(engine.registers().pc) else {
            break StopReason::EndOfProgram;
        };
        if steps == max_steps {
            break StopReason::StepLimit;
        }

        let record = engine.execute(text);
        steps += 1;
        last_result = Some(record.result);

        match record.status {
            StepStatus::Executed => {}
            StepStatus::Halted => break StopReason::Halted,
            StepStatus::Unknown => break StopReason::UnknownInstruction,
            StepStatus::Fault => break StopReason::Fault,
        }
    };

    ProgramReport {
        stop_reason,
        steps,
        final_state: engine.snapshot(),
        stack: engine.stack().to_vec(),
        last_result,
        trace: trace.then(|| engine.history().cloned().collect()),
    }
}

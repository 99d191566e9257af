use super::state::{Register, Registers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Load,
    Fetch,
    Store,
    Add,
    Sub,
    Mul,
    Mov,
    Jmp,
    Jz,
    Push,
    Pop,
    Conscious,
    Nop,
    Halt,
}

impl Opcode {
    /// Case-insensitive mnemonic lookup.
    pub fn parse(mnemonic: &str) -> Option<Self> {
        let op = match mnemonic.to_ascii_uppercase().as_str() {
            "LOAD" => Self::Load,
            "FETCH" => Self::Fetch,
            "STORE" => Self::Store,
            "ADD" => Self::Add,
            "SUB" => Self::Sub,
            "MUL" => Self::Mul,
            "MOV" => Self::Mov,
            "JMP" => Self::Jmp,
            "JZ" => Self::Jz,
            "PUSH" => Self::Push,
            "POP" => Self::Pop,
            "CONSCIOUS" => Self::Conscious,
            "NOP" => Self::Nop,
            "HALT" => Self::Halt,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Immediate(i64),
    Register(Register),
}

impl Operand {
    /// Register names win over literals; unparseable literals read as 0.
    pub fn parse(token: &str) -> Self {
        if let Some(register) = Register::parse(token) {
            return Self::Register(register);
        }
        Self::Immediate(parse_literal(token).unwrap_or(0))
    }

    pub fn resolve(&self, registers: &Registers) -> i64 {
        match self {
            Self::Immediate(v) => *v,
            Self::Register(r) => registers.get(*r),
        }
    }
}

fn parse_literal(token: &str) -> Option<i64> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { magnitude.wrapping_neg() } else { magnitude })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    /// Raw operand tokens, kept for fault messages.
    pub tokens: Vec<String>,
}

impl Instruction {
    pub fn operand(&self, index: usize) -> Option<Operand> {
        self.operands.get(index).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Known(Instruction),
    /// Unrecognized mnemonic, upper-cased.
    Unknown(String),
}

/// Split instruction text into an opcode and operand tokens.
///
/// Operands may be separated by whitespace or commas.
pub fn decode(text: &str) -> Decoded {
    let mut parts = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty());

    let Some(mnemonic) = parts.next() else {
        return Decoded::Unknown(String::new());
    };

    match Opcode::parse(mnemonic) {
        Some(opcode) => {
            let tokens: Vec<String> = parts.map(str::to_string).collect();
            let operands = tokens.iter().map(|t| Operand::parse(t)).collect();
            Decoded::Known(Instruction {
                opcode,
                operands,
                tokens,
            })
        }
        None => Decoded::Unknown(mnemonic.to_ascii_uppercase()),
    }
}

use std::fmt::{self, Write as _};

use crate::{Op, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Register(String),
    /// Pre-resolved program counter.
    Target(usize),
    /// Free word carried by bare instructions (`PING fail`, `INFER` payload).
    Word(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(Value::Text(text)) => write!(f, "{text:?}"),
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::Register(name) => write!(f, "%{name}"),
            Operand::Target(pc) => write!(f, "->{pc}"),
            Operand::Word(word) => f.write_str(word),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: u8,
    pub operands: Vec<Operand>,
}

impl Instruction {
    #[must_use]
    pub fn new(op: Op, operands: Vec<Operand>) -> Self {
        Self {
            opcode: op as u8,
            operands,
        }
    }

    pub fn op(&self) -> Result<Op, u8> {
        Op::try_from(self.opcode)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op() {
            Ok(op) => write!(f, "0x{:02x} {:<8}", self.opcode, op.mnemonic())?,
            Err(byte) => write!(f, "0x{byte:02x} {:<8}", "???")?,
        }
        for operand in &self.operands {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// Compiled program. The instruction at index `i` runs at pc `i`.
/// Immutable once built; engines share it through an `Arc`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    instructions: Vec<Instruction>,
    // source line of every instruction, for diagnostics
    lines: Vec<usize>,
}

impl Program {
    #[must_use]
    pub fn new(instructions: Vec<Instruction>, lines: Vec<usize>) -> Self {
        debug_assert_eq!(instructions.len(), lines.len());
        Self {
            instructions,
            lines,
        }
    }

    /// Builds a program without source lines, mostly for tests and tools
    /// that assemble instructions directly.
    #[must_use]
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        let lines = vec![0; instructions.len()];
        Self::new(instructions, lines)
    }

    #[must_use]
    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    #[must_use]
    pub fn line_of(&self, pc: usize) -> Option<usize> {
        self.lines.get(pc).copied()
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// One instruction per line: pc, source line, opcode, mnemonic, operands.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (pc, (instruction, line)) in
            self.instructions.iter().zip(&self.lines).enumerate()
        {
            let _ = writeln!(out, "{pc:>4}  L{line:<4} {instruction}");
        }
        out
    }
}

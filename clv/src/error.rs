use std::fmt;

use thiserror::Error;

use crate::SlotHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Label,
    Function,
    Macro,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Label => "label",
            SymbolKind::Function => "function",
            SymbolKind::Macro => "macro",
        };
        f.write_str(name)
    }
}

/// Translation failures. Lines are 1-based source line numbers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("line {line}: unknown mnemonic '{command}'")]
    UnknownMnemonic { line: usize, command: String },

    #[error("line {line}: unresolved {kind} '{name}'")]
    UnresolvedSymbol {
        line: usize,
        kind: SymbolKind,
        name: String,
    },

    #[error("line {line}: duplicate {kind} '{name}', first declared on line {first}")]
    DuplicateSymbol {
        line: usize,
        first: usize,
        kind: SymbolKind,
        name: String,
    },

    #[error("line {line}: macro '{name}' expands to macro '{inner}'")]
    RecursiveMacro {
        line: usize,
        name: String,
        inner: String,
    },

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

impl CompileError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        CompileError::Malformed {
            line,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            CompileError::UnknownMnemonic { line, .. }
            | CompileError::UnresolvedSymbol { line, .. }
            | CompileError::DuplicateSymbol { line, .. }
            | CompileError::RecursiveMacro { line, .. }
            | CompileError::Malformed { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("stale handle {0}")]
    StaleHandle(SlotHandle),
    #[error("double free of {0}")]
    DoubleFree(SlotHandle),
    #[error("handle {0} points outside the managed pages")]
    OutOfRange(SlotHandle),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FaultKind {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("type mismatch: {op} on {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("{op} cannot use a {found} value")]
    WrongType {
        op: &'static str,
        found: &'static str,
    },
    #[error("call stack underflow")]
    CallStackUnderflow,
    #[error("call stack overflow")]
    CallStackOverflow,
    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),
    #[error("invalid operand: {0}")]
    InvalidOperand(String),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("ping failed after {attempts} attempts")]
    PingRetriesExhausted { attempts: u32 },
    #[error("unknown thread {0}")]
    UnknownThread(i64),
    #[error("thread {0} cannot join itself")]
    SelfJoin(u64),
    #[error("joining thread {0} would deadlock")]
    JoinCycle(u64),
    #[error("failed to spawn thread: {0}")]
    SpawnFailed(String),
    #[error("step limit of {0} exceeded")]
    StepLimitExceeded(u64),
    #[error("thread panicked")]
    Panicked,
}

/// A fault that ended an engine, with the program counter it happened at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fault at pc {pc}: {kind}")]
pub struct RuntimeFault {
    pub pc: usize,
    pub kind: FaultKind,
}

impl RuntimeFault {
    #[must_use]
    pub fn new(pc: usize, kind: FaultKind) -> Self {
        Self { pc, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = CompileError::UnresolvedSymbol {
            line: 3,
            kind: SymbolKind::Label,
            name: "done".into(),
        };
        assert_eq!(err.to_string(), "line 3: unresolved label 'done'");
        assert_eq!(err.line(), 3);

        let fault = RuntimeFault::new(4, FaultKind::DivisionByZero);
        assert_eq!(fault.to_string(), "fault at pc 4: division by zero");

        let fault = RuntimeFault::new(0, FaultKind::InvalidOpcode(0x1b));
        assert_eq!(fault.to_string(), "fault at pc 0: invalid opcode 0x1b");
    }
}

use std::collections::{HashMap, HashSet};

/// Instruction opcodes.
///
/// Numbers are part of the instruction format and must stay stable. The
/// declaration keywords `LABEL` (0x1B), `FUNC` (0x20) and `MACRO` (0x25) own
/// codes in the same space but are consumed by the symbol resolver and never
/// emitted, so they have no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// Drop duplicate stack entries, keeping the first occurrence of each.
    Optimize = 0x01,

    /// Allocate a register holding `Unset`.
    /// Operands: `name`
    AllocReg = 0x03,

    /// Compact the evaluation stack to its most recent entries.
    /// Operands: `[count]`
    FlowCmp = 0x05,

    /// Clear the evaluation stack.
    Release = 0x06,

    /// Transient fault check. The annotation `fail` forces a fault.
    Ping = 0x07,

    /// Evict every register still holding `Unset`.
    Sift = 0x08,

    /// Opaque inference over the annotation words.
    Infer = 0x09,

    /// Interruptible wait for one pause quantum.
    Pause = 0x0B,

    /// Store a literal or another register's value.
    /// Operands: `name`, `value` (0 when missing, text when several words)
    Write = 0x10,

    /// Push a register's value, zero when unset.
    /// Operands: `name`
    Read = 0x11,

    Add = 0x12,
    Sub = 0x13,
    Mul = 0x14,
    Div = 0x15,
    Mod = 0x16,

    /// Operands: `target`
    Jump = 0x17,

    /// Pop, jump when zero.
    /// Operands: `target`
    Jz = 0x18,

    /// Pop, jump when non-zero.
    /// Operands: `target`
    Jnz = 0x19,

    /// Pop and emit the value.
    Print = 0x1A,

    /// Operands: `function`
    Call = 0x21,

    Ret = 0x22,

    /// Spawn an engine at the target and push its thread id.
    /// Operands: `target`
    Thread = 0x26,

    /// Pop a thread id and wait for that thread.
    Join = 0x27,

    /// Pop a value into a fresh memory slot, push the handle.
    Alloc = 0x28,

    /// Pop a handle and free its slot.
    Free = 0x2C,

    /// Pop a handle, push the slot's value.
    Load = 0x2D,

    /// Pop a value and write it to the slot of the handle below it. The
    /// handle stays on the stack.
    Store = 0x2E,

    End = 0xFF,
}

impl Op {
    pub const ALL: [Op; 28] = [
        Op::Optimize,
        Op::AllocReg,
        Op::FlowCmp,
        Op::Release,
        Op::Ping,
        Op::Sift,
        Op::Infer,
        Op::Pause,
        Op::Write,
        Op::Read,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Mod,
        Op::Jump,
        Op::Jz,
        Op::Jnz,
        Op::Print,
        Op::Call,
        Op::Ret,
        Op::Thread,
        Op::Join,
        Op::Alloc,
        Op::Free,
        Op::Load,
        Op::Store,
        Op::End,
    ];

    pub const COUNT: usize = Self::ALL.len();

    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Optimize => "OPTIMIZE",
            Op::AllocReg => "ALLOCREG",
            Op::FlowCmp => "FLOWCMP",
            Op::Release => "RELEASE",
            Op::Ping => "PING",
            Op::Sift => "SIFT",
            Op::Infer => "INFER",
            Op::Pause => "PAUSE",
            Op::Write => "WRITE",
            Op::Read => "READ",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::Jump => "JUMP",
            Op::Jz => "JZ",
            Op::Jnz => "JNZ",
            Op::Print => "PRINT",
            Op::Call => "CALL",
            Op::Ret => "RET",
            Op::Thread => "THREAD",
            Op::Join => "JOIN",
            Op::Alloc => "ALLOC",
            Op::Free => "FREE",
            Op::Load => "LOAD",
            Op::Store => "STORE",
            Op::End => "END",
        }
    }

    /// Operand shape the translator enforces for this opcode.
    #[must_use]
    pub fn shape(self) -> Shape {
        match self {
            Op::AllocReg | Op::Read => Shape::Register,
            Op::Write => Shape::Assign,
            Op::Jump | Op::Jz | Op::Jnz | Op::Call | Op::Thread => {
                Shape::Target
            }
            Op::FlowCmp => Shape::Count,
            _ => Shape::Bare,
        }
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        Op::ALL
            .iter()
            .copied()
            .find(|op| *op as u8 == byte)
            .ok_or(byte)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Free words, kept as annotations.
    Bare,
    /// Exactly one register name.
    Register,
    /// A register name followed by a value. No token means 0, several
    /// tokens form one text literal.
    Assign,
    /// Exactly one symbol, resolved to a program counter.
    Target,
    /// An optional non-negative count.
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    pub op: Op,
    pub mnemonic: &'static str,
    pub shape: Shape,
}

/// Mnemonic lookup. Built once and shared read-only between the translator
/// and any number of engines.
#[derive(Debug, Clone)]
pub struct OpcodeTable {
    by_mnemonic: HashMap<&'static str, OpInfo>,
}

impl OpcodeTable {
    #[must_use]
    pub fn standard() -> Self {
        let by_mnemonic = Op::ALL
            .iter()
            .map(|&op| {
                let info = OpInfo {
                    op,
                    mnemonic: op.mnemonic(),
                    shape: op.shape(),
                };
                (info.mnemonic, info)
            })
            .collect();
        Self { by_mnemonic }
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn lookup(&self, mnemonic: &str) -> Option<&OpInfo> {
        self.by_mnemonic.get(mnemonic.to_ascii_uppercase().as_str())
    }

    #[must_use]
    pub fn contains(&self, mnemonic: &str) -> bool {
        self.lookup(mnemonic).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_mnemonic.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_mnemonic.is_empty()
    }
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Modifier aliases. A modifier only selects an opcode when the command is
/// one of the reserved dispatch words, so `quick DO` means `OPTIMIZE` while
/// `quick WRITE x 1` stays a plain `WRITE`.
#[derive(Debug, Clone)]
pub struct AliasTable {
    aliases: HashMap<String, Op>,
    dispatch: HashSet<String>,
}

impl AliasTable {
    #[must_use]
    pub fn standard() -> Self {
        Self::empty()
            .with_alias("quick", Op::Optimize)
            .with_alias("auto", Op::Ping)
            .with_alias("active", Op::FlowCmp)
            .with_alias("soft", Op::Sift)
            .with_alias("high_load", Op::Release)
            .with_dispatch_word("DO")
            .with_dispatch_word("RUN")
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            aliases: HashMap::new(),
            dispatch: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_alias(mut self, modifier: &str, op: Op) -> Self {
        self.aliases.insert(modifier.to_ascii_lowercase(), op);
        self
    }

    #[must_use]
    pub fn with_dispatch_word(mut self, word: &str) -> Self {
        self.dispatch.insert(word.to_ascii_uppercase());
        self
    }

    #[must_use]
    pub fn is_dispatch_word(&self, command: &str) -> bool {
        self.dispatch.contains(&command.to_ascii_uppercase())
    }

    #[must_use]
    pub fn alias(&self, modifier: &str) -> Option<Op> {
        self.aliases.get(&modifier.to_ascii_lowercase()).copied()
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::standard()
    }
}

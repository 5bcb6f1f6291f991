use std::collections::HashMap;

use crate::{
    CompileError, Declaration, LineKind, OpcodeTable, SourceLine, SymbolKind,
};

/// Labels, function entry points and macro bodies collected by the first pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTables {
    pub labels: HashMap<String, usize>,
    pub functions: HashMap<String, usize>,
    pub macros: HashMap<String, Vec<String>>,
}

impl SymbolTables {
    /// First pass. Walks the lines with a running instruction counter;
    /// declarations record the counter without advancing it, every other line
    /// advances it by one.
    pub fn resolve(
        lines: &[SourceLine],
        opcodes: &OpcodeTable,
    ) -> Result<Self, CompileError> {
        let mut tables = SymbolTables::default();
        let mut declared: HashMap<(SymbolKind, &str), usize> = HashMap::new();
        let mut pc = 0;

        for line in lines {
            let (kind, rest) = match line.kind(opcodes) {
                LineKind::Command(_) => {
                    pc += 1;
                    continue;
                }
                LineKind::Declaration { kind, rest } => (kind, rest),
            };

            let Some((name, body)) = rest.split_first() else {
                return Err(CompileError::malformed(
                    line.number,
                    "declaration without a name",
                ));
            };

            let symbol = match kind {
                Declaration::Label => SymbolKind::Label,
                Declaration::Func => SymbolKind::Function,
                Declaration::Macro => SymbolKind::Macro,
            };
            if let Some(&first) = declared.get(&(symbol, name.as_str())) {
                return Err(CompileError::DuplicateSymbol {
                    line: line.number,
                    first,
                    kind: symbol,
                    name: name.clone(),
                });
            }
            declared.insert((symbol, name.as_str()), line.number);

            match kind {
                Declaration::Label | Declaration::Func if !body.is_empty() => {
                    return Err(CompileError::malformed(
                        line.number,
                        format!("unexpected tokens after {symbol} '{name}'"),
                    ));
                }
                Declaration::Label => {
                    tables.labels.insert(name.clone(), pc);
                }
                Declaration::Func => {
                    tables.functions.insert(name.clone(), pc);
                }
                Declaration::Macro => {
                    if body.is_empty() {
                        return Err(CompileError::malformed(
                            line.number,
                            format!("macro '{name}' has an empty body"),
                        ));
                    }
                    tables.macros.insert(name.clone(), body.to_vec());
                }
            }
        }

        log::debug!(
            "resolved {} labels, {} functions, {} macros over {pc} instructions",
            tables.labels.len(),
            tables.functions.len(),
            tables.macros.len()
        );
        Ok(tables)
    }

    #[must_use]
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<usize> {
        self.functions.get(name).copied()
    }

    #[must_use]
    pub fn macro_body(&self, name: &str) -> Option<&[String]> {
        self.macros.get(name).map(Vec::as_slice)
    }
}

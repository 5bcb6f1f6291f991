use crate::{
    AliasTable, CompileError, Declaration, Instruction, LineKind, Op,
    OpcodeTable, Operand, Program, Shape, SourceLine, SymbolKind, SymbolTables,
    Value, tokenize,
};

/// Source lines to [`Program`]. The tables are borrowed, never mutated, so
/// one pair can serve any number of compilers at once.
#[derive(Debug, Clone, Copy)]
pub struct Compiler<'t> {
    opcodes: &'t OpcodeTable,
    aliases: &'t AliasTable,
}

/// A command line split into its parts, after macro expansion.
struct Command<'a> {
    modifier: Option<&'a str>,
    command: &'a str,
    args: &'a [String],
}

impl<'t> Compiler<'t> {
    #[must_use]
    pub fn new(opcodes: &'t OpcodeTable, aliases: &'t AliasTable) -> Self {
        Self { opcodes, aliases }
    }

    pub fn compile_source(&self, source: &str) -> Result<Program, CompileError> {
        let lines: Vec<&str> = source.lines().collect();
        self.compile(&lines)
    }

    /// Both passes. Either the whole program comes back or the first error
    /// does; nothing is partially compiled.
    pub fn compile<S: AsRef<str>>(
        &self,
        lines: &[S],
    ) -> Result<Program, CompileError> {
        let lines = tokenize(lines)?;
        let symbols = SymbolTables::resolve(&lines, self.opcodes)?;
        self.translate(&lines, &symbols)
    }

    /// Second pass.
    pub fn translate(
        &self,
        lines: &[SourceLine],
        symbols: &SymbolTables,
    ) -> Result<Program, CompileError> {
        let mut instructions = Vec::new();
        let mut source_lines = Vec::new();

        for line in lines {
            let LineKind::Command(tokens) = line.kind(self.opcodes) else {
                continue;
            };
            let command = self.split(line.number, tokens, symbols)?;
            let command = self.expand(line.number, command, symbols)?;
            let op = self.resolve_op(line.number, &command)?;
            let operands = self.operands(line.number, op, command.args, symbols)?;

            let instruction = Instruction::new(op, operands);
            log::trace!(
                "L{} pc {}: {instruction}",
                line.number,
                instructions.len()
            );
            instructions.push(instruction);
            source_lines.push(line.number);
        }

        log::debug!("compiled {} instructions", instructions.len());
        Ok(Program::new(instructions, source_lines))
    }

    // The modifier is optional: a leading mnemonic or macro name is the
    // command itself.
    fn split<'a>(
        &self,
        line: usize,
        tokens: &'a [String],
        symbols: &SymbolTables,
    ) -> Result<Command<'a>, CompileError> {
        let Some((first, rest)) = tokens.split_first() else {
            return Err(CompileError::malformed(line, "empty command"));
        };
        if self.opcodes.contains(first) || symbols.macros.contains_key(first) {
            return Ok(Command {
                modifier: None,
                command: first,
                args: rest,
            });
        }
        match rest.split_first() {
            Some((command, args)) => Ok(Command {
                modifier: Some(first.as_str()),
                command,
                args,
            }),
            None => Err(CompileError::UnknownMnemonic {
                line,
                command: first.clone(),
            }),
        }
    }

    fn expand<'a>(
        &self,
        line: usize,
        command: Command<'a>,
        symbols: &'a SymbolTables,
    ) -> Result<Command<'a>, CompileError> {
        let Some(body) = symbols.macro_body(command.command) else {
            return Ok(command);
        };
        let Some((inner, args)) = body.split_first() else {
            return Err(CompileError::malformed(
                line,
                format!("macro '{}' has an empty body", command.command),
            ));
        };
        if symbols.macros.contains_key(inner) {
            return Err(CompileError::RecursiveMacro {
                line,
                name: command.command.to_string(),
                inner: inner.clone(),
            });
        }
        if Declaration::from_keyword(inner).is_some() {
            return Err(CompileError::malformed(
                line,
                format!("macro '{}' expands to a declaration", command.command),
            ));
        }
        if !command.args.is_empty() {
            log::debug!(
                "L{line}: arguments to macro '{}' are ignored",
                command.command
            );
        }
        Ok(Command {
            modifier: command.modifier,
            command: inner,
            args,
        })
    }

    fn resolve_op(&self, line: usize, command: &Command<'_>) -> Result<Op, CompileError> {
        let op = if self.aliases.is_dispatch_word(command.command) {
            command.modifier.and_then(|modifier| self.aliases.alias(modifier))
        } else {
            self.opcodes.lookup(command.command).map(|info| info.op)
        };
        op.ok_or_else(|| CompileError::UnknownMnemonic {
            line,
            command: command.command.to_string(),
        })
    }

    fn operands(
        &self,
        line: usize,
        op: Op,
        args: &[String],
        symbols: &SymbolTables,
    ) -> Result<Vec<Operand>, CompileError> {
        let arity = |expected: &str| {
            CompileError::malformed(
                line,
                format!(
                    "{} expects {expected}, got {} operand(s)",
                    op.mnemonic(),
                    args.len()
                ),
            )
        };

        match op.shape() {
            Shape::Bare => Ok(args.iter().cloned().map(Operand::Word).collect()),
            Shape::Register => {
                let [name] = args else {
                    return Err(arity("a register name"));
                };
                Ok(vec![Operand::Register(register_name(line, name)?)])
            }
            Shape::Assign => {
                let Some((name, values)) = args.split_first() else {
                    return Err(arity("a register name"));
                };
                let source = match values {
                    [] => Operand::Literal(Value::Integer(0)),
                    [value] => value_operand(line, value)?,
                    words => Operand::Literal(Value::Text(words.join(" "))),
                };
                Ok(vec![Operand::Register(register_name(line, name)?), source])
            }
            Shape::Target => {
                let [name] = args else {
                    return Err(arity("a target"));
                };
                let (kind, pc) = match op {
                    Op::Call => (SymbolKind::Function, symbols.function(name)),
                    Op::Thread => (
                        SymbolKind::Label,
                        symbols.label(name).or_else(|| symbols.function(name)),
                    ),
                    _ => (SymbolKind::Label, symbols.label(name)),
                };
                let pc = pc.ok_or_else(|| CompileError::UnresolvedSymbol {
                    line,
                    kind,
                    name: name.clone(),
                })?;
                Ok(vec![Operand::Target(pc)])
            }
            Shape::Count => match args {
                [] => Ok(Vec::new()),
                [count] => {
                    let count = count.parse::<u32>().map_err(|_| {
                        CompileError::malformed(
                            line,
                            format!("{} count must be a non-negative integer", op.mnemonic()),
                        )
                    })?;
                    Ok(vec![Operand::Literal(Value::Integer(i64::from(count)))])
                }
                _ => Err(arity("at most one count")),
            },
        }
    }
}

/// A single value token: a literal, or the name of a register to copy.
fn value_operand(line: usize, token: &str) -> Result<Operand, CompileError> {
    match Value::parse_literal(token) {
        Some(literal) => Ok(Operand::Literal(literal)),
        None if is_numeric(token) => Err(CompileError::malformed(
            line,
            format!("numeric literal '{token}' is out of range"),
        )),
        None => register_name(line, token).map(Operand::Register),
    }
}

fn register_name(line: usize, token: &str) -> Result<String, CompileError> {
    if Value::parse_literal(token).is_some()
        || is_numeric(token)
        || token.starts_with(['"', '\''])
    {
        return Err(CompileError::malformed(
            line,
            format!("expected a register name, found '{token}'"),
        ));
    }
    Ok(token.to_string())
}

fn is_numeric(token: &str) -> bool {
    token
        .trim_start_matches(['-', '+'])
        .starts_with(|c: char| c.is_ascii_digit())
}

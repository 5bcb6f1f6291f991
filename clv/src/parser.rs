use crate::{CompileError, OpcodeTable};

/// Whitespace tokenizer for one source line. Quoted text (`"..."` or
/// `'...'`) is a single token and keeps its quotes.
#[derive(Debug)]
pub struct Scanner<'src> {
    code: &'src str,
    offset: usize,
}

impl<'src> Scanner<'src> {
    #[must_use]
    pub fn new(code: &'src str) -> Self {
        Self { code, offset: 0 }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.offset >= self.code.len()
    }

    #[inline]
    fn current(&self) -> u8 {
        self.code.as_bytes()[self.offset]
    }

    #[inline]
    pub fn skip_whitespace(&mut self) {
        while !self.is_done() && self.current().is_ascii_whitespace() {
            self.offset += 1;
        }
    }

    /// Next token, `Ok(None)` at end of line. Errors carry only the reason,
    /// the caller knows the line number.
    pub fn next_token(&mut self) -> Result<Option<&'src str>, String> {
        self.skip_whitespace();
        if self.is_done() {
            return Ok(None);
        }

        let start = self.offset;
        let quote = self.current();
        if quote == b'"' || quote == b'\'' {
            self.offset += 1;
            while !self.is_done() && self.current() != quote {
                self.offset += 1;
            }
            if self.is_done() {
                return Err(format!(
                    "unterminated text starting at column {}",
                    start + 1
                ));
            }
            self.offset += 1;
            return Ok(Some(&self.code[start..self.offset]));
        }

        while !self.is_done() && !self.current().is_ascii_whitespace() {
            self.offset += 1;
        }
        Ok(Some(&self.code[start..self.offset]))
    }
}

/// A tokenized, non-empty source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 1-based.
    pub number: usize,
    pub tokens: Vec<String>,
}

/// Tokenizes every line, dropping blank lines and `#` comments.
pub fn tokenize<S: AsRef<str>>(
    lines: &[S],
) -> Result<Vec<SourceLine>, CompileError> {
    let mut out = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        let number = index + 1;
        let text = line.as_ref().trim_start();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        let mut scanner = Scanner::new(text);
        let mut tokens = Vec::new();
        while let Some(token) = scanner
            .next_token()
            .map_err(|reason| CompileError::Malformed { line: number, reason })?
        {
            tokens.push(token.to_string());
        }
        out.push(SourceLine { number, tokens });
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declaration {
    Label,
    Func,
    Macro,
}

impl Declaration {
    pub(crate) fn from_keyword(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "LABEL" => Some(Declaration::Label),
            "FUNC" => Some(Declaration::Func),
            "MACRO" => Some(Declaration::Macro),
            _ => None,
        }
    }
}

/// Line classification shared by both compiler passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// `[modifier] LABEL|FUNC|MACRO rest...`. A mnemonic in first position
    /// is never read as a modifier, so `WRITE label 1` stays a command.
    Declaration {
        kind: Declaration,
        rest: &'a [String],
    },
    /// Anything else. Occupies one instruction slot.
    Command(&'a [String]),
}

impl SourceLine {
    #[must_use]
    pub fn kind(&self, opcodes: &OpcodeTable) -> LineKind<'_> {
        let tokens = self.tokens.as_slice();
        let Some(first) = tokens.first() else {
            return LineKind::Command(tokens);
        };
        if let Some(kind) = Declaration::from_keyword(first) {
            return LineKind::Declaration {
                kind,
                rest: &tokens[1..],
            };
        }
        if opcodes.contains(first) {
            return LineKind::Command(tokens);
        }
        if let Some(kind) = tokens.get(1).and_then(|t| Declaration::from_keyword(t)) {
            return LineKind::Declaration {
                kind,
                rest: &tokens[2..],
            };
        }
        LineKind::Command(tokens)
    }
}

use std::fmt;

use crate::SlotHandle;

/// A runtime value.
///
/// `Unset` is what a freshly allocated register holds. It is distinct from
/// `Integer(0)` so that sifting can tell "never written" from "written zero".
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Unset,
    Integer(i64),
    Float(f64),
    Text(String),
    Handle(SlotHandle),
}

impl Value {
    #[must_use]
    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    /// Maps `Unset` to integer zero, leaves everything else alone.
    #[must_use]
    pub fn or_zero(self) -> Value {
        match self {
            Value::Unset => Value::Integer(0),
            other => other,
        }
    }

    /// Zero test used by conditional jumps. `None` for values that have no
    /// truthiness.
    #[must_use]
    pub fn is_zero(&self) -> Option<bool> {
        match self {
            Value::Unset => Some(true),
            Value::Integer(i) => Some(*i == 0),
            Value::Float(f) => Some(*f == 0.0),
            Value::Text(_) | Value::Handle(_) => None,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unset => "unset",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Handle(_) => "handle",
        }
    }

    /// Parses a literal token: integers (signed), floats, or quoted text.
    /// Anything else is not a literal and `None` is returned. Integers that
    /// do not fit an `i64` and floats that do not stay finite are not
    /// literals either; they never turn into a different type.
    #[must_use]
    pub fn parse_literal(token: &str) -> Option<Value> {
        if let Some(text) = unquote(token) {
            return Some(Value::Text(text.to_string()));
        }
        let digits = token.trim_start_matches(['-', '+']);
        if !digits.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        if let Ok(int) = token.parse::<i64>() {
            return Some(Value::Integer(int));
        }
        if digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        token
            .parse::<f64>()
            .ok()
            .filter(|float| float.is_finite())
            .map(Value::Float)
    }
}

pub(crate) fn unquote(token: &str) -> Option<&str> {
    let bytes = token.as_bytes();
    if bytes.len() < 2 {
        return None;
    }
    let first = bytes[0];
    if (first == b'"' || first == b'\'') && bytes[bytes.len() - 1] == first {
        Some(&token[1..token.len() - 1])
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unset => write!(f, "unset"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Handle(h) => write!(f, "{h}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal() {
        assert_eq!(Value::parse_literal("10"), Some(Value::Integer(10)));
        assert_eq!(Value::parse_literal("-7"), Some(Value::Integer(-7)));
        assert_eq!(Value::parse_literal("2.5"), Some(Value::Float(2.5)));
        assert_eq!(
            Value::parse_literal("'hello world'"),
            Some(Value::Text("hello world".into()))
        );
        assert_eq!(Value::parse_literal("\"\""), Some(Value::Text(String::new())));
        assert_eq!(Value::parse_literal("x"), None);
        assert_eq!(Value::parse_literal("-x"), None);
        assert_eq!(Value::parse_literal("inf"), None);
        assert_eq!(Value::parse_literal("'open"), None);
        assert_eq!(Value::parse_literal("99999999999999999999"), None);
        assert_eq!(Value::parse_literal("-99999999999999999999"), None);
        assert_eq!(Value::parse_literal("1e999"), None);
        assert_eq!(Value::parse_literal("1e3"), Some(Value::Float(1000.0)));
    }

    #[test]
    fn test_unset_is_not_zero_but_reads_as_zero() {
        assert_ne!(Value::Unset, Value::Integer(0));
        assert_eq!(Value::Unset.or_zero(), Value::Integer(0));
        assert_eq!(Value::Float(1.5).or_zero(), Value::Float(1.5));
    }

    #[test]
    fn test_is_zero() {
        assert_eq!(Value::Integer(0).is_zero(), Some(true));
        assert_eq!(Value::Float(0.0).is_zero(), Some(true));
        assert_eq!(Value::Integer(3).is_zero(), Some(false));
        assert_eq!(Value::Text("0".into()).is_zero(), None);
    }
}

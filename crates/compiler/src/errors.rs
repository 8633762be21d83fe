//! Source positions and compilation errors.
//!
//! Every failure anywhere in the pipeline is reported as a
//! [`CompilationError`] carrying the position of the offending token or AST
//! node, formatted as `<line>:<col>: <message>`.

use std::fmt;

/// A source coordinate, 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }

    /// Format a message with this position prepended.
    pub fn format_error(&self, message: &str) -> String {
        format!("{}:{}: {}", self.line, self.column, message)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Classification of a compilation failure.
///
/// The kind is informational; hosts normally just print the message. All
/// kinds abort compilation immediately, there is no recovery or multi-error
/// reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed token
    Lex,
    /// Unexpected token
    Syntax,
    /// Unresolved or misused identifier
    Symbol,
    /// Type mismatch
    Type,
    /// Built-in operator applied to unsupported operand types
    IntrinsicType,
    /// Backend (code generation engine) failure
    Internal,
}

/// Error type for the whole compilation pipeline.
#[derive(Debug, Clone)]
pub struct CompilationError {
    pub kind: ErrorKind,
    pub position: Position,
    pub message: String,
}

impl CompilationError {
    pub fn new(kind: ErrorKind, position: Position, message: impl Into<String>) -> Self {
        CompilationError {
            kind,
            position,
            message: message.into(),
        }
    }

    pub fn lex(position: Position, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lex, position, message)
    }

    pub fn syntax(position: Position, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, position, message)
    }

    /// An unresolved symbol reference.
    pub fn symbol(position: Position, id: &str) -> Self {
        Self::new(
            ErrorKind::Symbol,
            position,
            format!("unresolved symbol '{}'", id),
        )
    }

    pub fn symbol_misuse(position: Position, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Symbol, position, message)
    }

    pub fn type_mismatch(position: Position, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, position, message)
    }

    /// A built-in operator applied to operand types it has no form for.
    pub fn intrinsic(position: Position, id: &str) -> Self {
        Self::new(
            ErrorKind::IntrinsicType,
            position,
            format!("wrong type applied to '{}'", id),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, Position::default(), message)
    }
}

impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.position.format_error(&self.message))
    }
}

impl std::error::Error for CompilationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error() {
        let pos = Position::new(3, 14);
        assert_eq!(pos.format_error("expected ')'"), "3:14: expected ')'");
    }

    #[test]
    fn test_display_carries_position() {
        let err = CompilationError::symbol(Position::new(1, 7), "foo");
        assert_eq!(err.to_string(), "1:7: unresolved symbol 'foo'");
        assert_eq!(err.kind, ErrorKind::Symbol);
    }
}

//! Pull-based lexer for Calculon scripts and type signatures.
//!
//! The lexer is a look-one-ahead iterator: `token()` and friends inspect the
//! current token, `next()` advances. After the input is exhausted it yields
//! `EndOfFile` indefinitely. Keywords are lexed as ordinary identifiers and
//! classified by the parser.

use crate::errors::{CompilationError, Position};

/// The kind of the current token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    Identifier,
    Operator,
    OpenParen,
    CloseParen,
    OpenBlock,
    CloseBlock,
    Comma,
    Colon,
    Dot,
    Semicolon,
    EndOfFile,
}

impl TokenKind {
    /// Human-readable name, used in "expected ..." diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Number => "number",
            TokenKind::Identifier => "identifier",
            TokenKind::Operator => "operator",
            TokenKind::OpenParen => "'('",
            TokenKind::CloseParen => "')'",
            TokenKind::OpenBlock => "'{'",
            TokenKind::CloseBlock => "'}'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Dot => "'.'",
            TokenKind::Semicolon => "';'",
            TokenKind::EndOfFile => "end of input",
        }
    }
}

pub struct Lexer<'a> {
    source: &'a [u8],
    offset: usize,
    line: u32,
    column: u32,

    // Current token
    kind: TokenKind,
    text: String,
    value: f64,
    position: Position,
}

impl<'a> Lexer<'a> {
    /// Create a lexer positioned on the first token of `source`.
    pub fn new(source: &'a str) -> Result<Self, CompilationError> {
        let mut lexer = Lexer {
            source: source.as_bytes(),
            offset: 0,
            line: 1,
            column: 1,
            kind: TokenKind::EndOfFile,
            text: String::new(),
            value: 0.0,
            position: Position::new(1, 1),
        };
        lexer.next()?;
        Ok(lexer)
    }

    pub fn token(&self) -> TokenKind {
        self.kind
    }

    /// Text of the current identifier or operator.
    pub fn id(&self) -> &str {
        &self.text
    }

    /// Value of the current number token.
    pub fn real(&self) -> f64 {
        self.value
    }

    /// Position of the first character of the current token.
    pub fn position(&self) -> Position {
        self.position
    }

    /// A lex error at the current token's position.
    pub fn error(&self, message: impl Into<String>) -> CompilationError {
        CompilationError::lex(self.position, message)
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.offset += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'#' {
                while let Some(c) = self.bump() {
                    if c == b'\n' {
                        break;
                    }
                }
            } else if c.is_ascii_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Advance to the next token.
    pub fn next(&mut self) -> Result<(), CompilationError> {
        self.skip_whitespace_and_comments();
        self.position = Position::new(self.line, self.column);
        self.text.clear();
        self.value = 0.0;

        let c = match self.peek() {
            Some(c) => c,
            None => {
                self.kind = TokenKind::EndOfFile;
                return Ok(());
            }
        };

        self.kind = match c {
            b'(' => {
                self.bump();
                TokenKind::OpenParen
            }
            b')' => {
                self.bump();
                TokenKind::CloseParen
            }
            b'{' => {
                self.bump();
                TokenKind::OpenBlock
            }
            b'}' => {
                self.bump();
                TokenKind::CloseBlock
            }
            b',' => {
                self.bump();
                TokenKind::Comma
            }
            b':' => {
                self.bump();
                TokenKind::Colon
            }
            b';' => {
                self.bump();
                TokenKind::Semicolon
            }
            b'.' => {
                self.bump();
                TokenKind::Dot
            }
            b'+' | b'-' | b'*' | b'/' => {
                self.bump();
                self.text.push(c as char);
                TokenKind::Operator
            }
            b'<' | b'>' | b'=' | b'!' => {
                self.bump();
                self.text.push(c as char);
                // Maximal munch for <=, >=, ==, !=
                if self.peek() == Some(b'=') {
                    self.bump();
                    self.text.push('=');
                } else if c == b'!' {
                    return Err(self.error("unrecognised character '!'"));
                }
                TokenKind::Operator
            }
            b'0'..=b'9' => {
                self.lex_number()?;
                TokenKind::Number
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == b'_' {
                        self.text.push(c as char);
                        self.bump();
                    } else {
                        break;
                    }
                }
                TokenKind::Identifier
            }
            c => {
                return Err(self.error(format!("unrecognised character '{}'", c as char)));
            }
        };

        Ok(())
    }

    // [0-9]+(\.[0-9]+)?([eE][-+]?[0-9]+)?
    fn lex_number(&mut self) -> Result<(), CompilationError> {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.text.push(c as char);
                self.bump();
            } else {
                break;
            }
        }

        // A '.' is only part of the number when followed by a digit; a bare
        // trailing dot is the member-access token.
        if self.peek() == Some(b'.')
            && self
                .source
                .get(self.offset + 1)
                .is_some_and(|c| c.is_ascii_digit())
        {
            self.text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    self.text.push(c as char);
                    self.bump();
                } else {
                    break;
                }
            }
        }

        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            self.text.push('e');
            self.bump();
            if let Some(sign @ (b'-' | b'+')) = self.peek() {
                self.text.push(sign as char);
                self.bump();
            }
            let mut digits = 0;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    self.text.push(c as char);
                    self.bump();
                    digits += 1;
                } else {
                    break;
                }
            }
            if digits == 0 {
                return Err(self.error("malformed number: missing exponent digits"));
            }
        }

        self.value = self
            .text
            .parse::<f64>()
            .map_err(|_| self.error(format!("malformed number '{}'", self.text)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tokens(source: &str) -> Vec<(TokenKind, String, f64)> {
        let mut lexer = Lexer::new(source).unwrap();
        let mut tokens = Vec::new();
        while lexer.token() != TokenKind::EndOfFile {
            // id() is only meaningful for identifiers and operators, real()
            // only for numbers; blank out the rest so comparisons see token
            // identity, not source spelling.
            let text = match lexer.token() {
                TokenKind::Identifier | TokenKind::Operator => lexer.id().to_string(),
                _ => String::new(),
            };
            tokens.push((lexer.token(), text, lexer.real()));
            lexer.next().unwrap();
        }
        tokens
    }

    /// Render a lexed token back to source text.
    fn render(kind: TokenKind, text: &str, value: f64) -> String {
        match kind {
            TokenKind::Number => format!("{}", value),
            TokenKind::Identifier | TokenKind::Operator => text.to_string(),
            TokenKind::OpenParen => "(".to_string(),
            TokenKind::CloseParen => ")".to_string(),
            TokenKind::OpenBlock => "{".to_string(),
            TokenKind::CloseBlock => "}".to_string(),
            TokenKind::Comma => ",".to_string(),
            TokenKind::Colon => ":".to_string(),
            TokenKind::Dot => ".".to_string(),
            TokenKind::Semicolon => ";".to_string(),
            TokenKind::EndOfFile => String::new(),
        }
    }

    #[test]
    fn test_numbers() {
        let tokens = all_tokens("1 2.5 10e3 1.25e-2");
        let values: Vec<f64> = tokens.iter().map(|t| t.2).collect();
        assert_eq!(values, vec![1.0, 2.5, 10e3, 1.25e-2]);
    }

    #[test]
    fn test_number_then_dot_is_member_access() {
        let tokens = all_tokens("v.x 1.5");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.0).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Identifier,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::Number
            ]
        );
    }

    #[test]
    fn test_operators_maximal_munch() {
        let tokens = all_tokens("<= < == != >= > = + - * /");
        let texts: Vec<&str> = tokens.iter().map(|t| t.1.as_str()).collect();
        assert_eq!(
            texts,
            vec!["<=", "<", "==", "!=", ">=", ">", "=", "+", "-", "*", "/"]
        );
    }

    #[test]
    fn test_keywords_are_identifiers() {
        let tokens = all_tokens("let in if then else true not");
        assert!(tokens.iter().all(|t| t.0 == TokenKind::Identifier));
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = all_tokens("1 # a comment with let and {\n2");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_positions() {
        let mut lexer = Lexer::new("a\n  bb").unwrap();
        assert_eq!(lexer.position(), Position::new(1, 1));
        lexer.next().unwrap();
        assert_eq!(lexer.position(), Position::new(2, 3));
    }

    #[test]
    fn test_eof_is_sticky() {
        let mut lexer = Lexer::new("").unwrap();
        assert_eq!(lexer.token(), TokenKind::EndOfFile);
        lexer.next().unwrap();
        assert_eq!(lexer.token(), TokenKind::EndOfFile);
    }

    #[test]
    fn test_bad_exponent() {
        assert!(Lexer::new("1e+").is_err());
    }

    #[test]
    fn test_unknown_character() {
        assert!(Lexer::new("@").is_err());
        assert!(Lexer::new("a ! b").and_then(|mut l| l.next()).is_err());
    }

    // Lexing the rendered form of a token stream yields the same stream.
    #[test]
    fn test_render_roundtrip() {
        let source = "let f(x: vector*3) = {x.y, 2.5e1, pi} in f(v) <= 9 != true";
        let tokens = all_tokens(source);
        let rendered: Vec<String> = tokens
            .iter()
            .map(|(k, t, v)| render(*k, t, *v))
            .collect();
        let relexed = all_tokens(&rendered.join(" "));
        assert_eq!(tokens, relexed);
    }
}

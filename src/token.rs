use log::debug;
use serde::Serialize;
use std::fmt;
use std::mem;

/// Token kinds. Variant names double as the `tokenize` output, so they keep
/// their upper‑case spelling. Only `STRING` and `NUMBER` carry a literal.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Serialize)]
pub enum TokenType {
    // Punctuation.
    LEFT_PAREN,
    RIGHT_PAREN,
    LEFT_BRACE,
    RIGHT_BRACE,
    COMMA,
    DOT,
    SEMICOLON,

    // Operators, one or two characters.
    MINUS,
    PLUS,
    SLASH,
    STAR,
    BANG,
    BANG_EQUAL,
    EQUAL,
    EQUAL_EQUAL,
    GREATER,
    GREATER_EQUAL,
    LESS,
    LESS_EQUAL,

    // Literals. A string's payload excludes the quotes.
    IDENTIFIER,
    STRING(String),
    NUMBER(f64),

    // Reserved words.
    AND,
    CLASS,
    ELSE,
    FALSE,
    FOR,
    FUN,
    IF,
    NIL,
    OR,
    PRINT,
    RETURN,
    SUPER,
    THIS,
    TRUE,
    VAR,
    WHILE,

    /// `// …` line comment; only produced by `ScanMode::EmitComments`.
    COMMENT,
    EOF,
}

impl TokenType {
    /// Upper‑case variant name without payload, as printed by `tokenize`.
    pub fn name(&self) -> &'static str {
        match self {
            TokenType::STRING(_) => "STRING",
            TokenType::NUMBER(_) => "NUMBER",
            TokenType::LEFT_PAREN => "LEFT_PAREN",
            TokenType::RIGHT_PAREN => "RIGHT_PAREN",
            TokenType::LEFT_BRACE => "LEFT_BRACE",
            TokenType::RIGHT_BRACE => "RIGHT_BRACE",
            TokenType::COMMA => "COMMA",
            TokenType::DOT => "DOT",
            TokenType::MINUS => "MINUS",
            TokenType::PLUS => "PLUS",
            TokenType::SEMICOLON => "SEMICOLON",
            TokenType::SLASH => "SLASH",
            TokenType::STAR => "STAR",
            TokenType::BANG => "BANG",
            TokenType::BANG_EQUAL => "BANG_EQUAL",
            TokenType::EQUAL => "EQUAL",
            TokenType::EQUAL_EQUAL => "EQUAL_EQUAL",
            TokenType::GREATER => "GREATER",
            TokenType::GREATER_EQUAL => "GREATER_EQUAL",
            TokenType::LESS => "LESS",
            TokenType::LESS_EQUAL => "LESS_EQUAL",
            TokenType::IDENTIFIER => "IDENTIFIER",
            TokenType::AND => "AND",
            TokenType::CLASS => "CLASS",
            TokenType::ELSE => "ELSE",
            TokenType::FALSE => "FALSE",
            TokenType::FUN => "FUN",
            TokenType::FOR => "FOR",
            TokenType::IF => "IF",
            TokenType::NIL => "NIL",
            TokenType::OR => "OR",
            TokenType::PRINT => "PRINT",
            TokenType::RETURN => "RETURN",
            TokenType::SUPER => "SUPER",
            TokenType::THIS => "THIS",
            TokenType::TRUE => "TRUE",
            TokenType::VAR => "VAR",
            TokenType::WHILE => "WHILE",
            TokenType::COMMENT => "COMMENT",
            TokenType::EOF => "EOF",
        }
    }
}

// Kind comparison only: `NUMBER(1.0) == NUMBER(2.0)`.
impl PartialEq for TokenType {
    fn eq(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

/// A scanned token, including its type, the original lexeme,
/// and the line number where it was found.
///
/// Tokens own their lexeme so AST nodes (and the closures built from them)
/// can outlive the source buffer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Token {
    /// The category of this token, carrying the literal for strings and numbers.
    pub token_type: TokenType,

    /// The exact substring from the source that produced this token.
    pub lexeme: String,

    /// 1‑based line number in the source.
    pub line: usize,
}

impl Token {
    /// Create a new Token with the given type, lexeme, and line.
    pub fn new<S: Into<String>>(token_type: TokenType, lexeme: S, line: usize) -> Self {
        let lexeme: String = lexeme.into();

        debug!(
            "Creating new token: type={:?}, lexeme={}, line={}",
            token_type, lexeme, line
        );

        Self {
            token_type,
            lexeme,
            line,
        }
    }

    /// Synthesised identifier token, used for implicit names such as `this`.
    pub fn synthetic(lexeme: &str, line: usize) -> Self {
        Self::new(TokenType::IDENTIFIER, lexeme, line)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.token_type.name(), self.lexeme)?;

        match &self.token_type {
            TokenType::STRING(s) => write!(f, "{}", s),

            // 3 → "3.0", 3.14 → "3.14"
            TokenType::NUMBER(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                let mut buf: itoa::Buffer = itoa::Buffer::new();
                write!(f, "{}.0", buf.format(*n as i64))
            }

            // Beyond i64-safe range `Display` still prints every digit.
            TokenType::NUMBER(n) if n.fract() == 0.0 => write!(f, "{}.0", n),

            TokenType::NUMBER(n) => write!(f, "{}", n),

            _ => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_type_equality_ignores_payload() {
        assert_eq!(TokenType::NUMBER(1.0), TokenType::NUMBER(2.0));
        assert_eq!(
            TokenType::STRING("a".into()),
            TokenType::STRING("b".into())
        );
        assert_ne!(TokenType::NUMBER(1.0), TokenType::IDENTIFIER);
    }

    #[test]
    fn display_matches_tokenize_format() {
        let int = Token::new(TokenType::NUMBER(42.0), "42", 1);
        let frac = Token::new(TokenType::NUMBER(3.25), "3.25", 1);
        let s = Token::new(TokenType::STRING("hi".into()), "\"hi\"", 1);
        let ident = Token::new(TokenType::IDENTIFIER, "foo", 1);

        assert_eq!(int.to_string(), "NUMBER 42 42.0");
        assert_eq!(frac.to_string(), "NUMBER 3.25 3.25");
        assert_eq!(s.to_string(), "STRING \"hi\" hi");
        assert_eq!(ident.to_string(), "IDENTIFIER foo null");
        assert_eq!(Token::new(TokenType::EOF, "", 1).to_string(), "EOF  null");

        let big = Token::new(TokenType::NUMBER(1e15), "1000000000000000", 1);
        assert_eq!(big.to_string(), "NUMBER 1000000000000000 1000000000000000.0");
    }
}

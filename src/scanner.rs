//! Streaming lexer.
//!
//! [`Scanner`] walks the source once, byte by byte, and yields one
//! `Result<Token>` per lexeme. Whitespace and newlines produce nothing. Line
//! comments are dropped unless the scanner runs in [`ScanMode::EmitComments`].
//! A lexical error is yielded in place of the offending lexeme and scanning
//! picks up right after it, so a single pass reports every bad character.
//! The stream always ends with exactly one `EOF` token.
//!
//! ```rust
//! use rox::scanner::Scanner;
//!
//! for result in Scanner::new("print 123; // trailing") {
//!     match result {
//!         Ok(token) => println!("{}", token),
//!         Err(err) => eprintln!("{}", err),
//!     }
//! }
//! ```
//!
//! [`scan`] and [`scan_with`] drain the iterator eagerly and split tokens
//! from errors.

use std::iter::FusedIterator;

use log::{debug, info};
use memchr::memchr;
use phf::phf_map;

use crate::error::{LoxError, Result};
use crate::token::{Token, TokenType};

static KEYWORDS: phf::Map<&'static str, TokenType> = phf_map! {
    "and" => TokenType::AND,
    "class" => TokenType::CLASS,
    "else" => TokenType::ELSE,
    "false" => TokenType::FALSE,
    "for" => TokenType::FOR,
    "fun" => TokenType::FUN,
    "if" => TokenType::IF,
    "nil" => TokenType::NIL,
    "or" => TokenType::OR,
    "print" => TokenType::PRINT,
    "return" => TokenType::RETURN,
    "super" => TokenType::SUPER,
    "this" => TokenType::THIS,
    "true" => TokenType::TRUE,
    "var" => TokenType::VAR,
    "while" => TokenType::WHILE,
};

/// What the scanner does with `//` line comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Drop comments entirely.
    #[default]
    SkipComments,

    /// Emit each comment as a `COMMENT` token (lexeme includes the slashes).
    EmitComments,
}

pub struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    mode: ScanMode,

    /// Byte offset where the lexeme being scanned begins.
    start: usize,
    /// Byte offset of the next unread byte.
    pos: usize,
    line: usize,
    finished: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self::with_mode(src, ScanMode::SkipComments)
    }

    pub fn with_mode(src: &'a str, mode: ScanMode) -> Self {
        info!("Scanner created over {} bytes ({:?})", src.len(), mode);

        Self {
            src,
            bytes: src.as_bytes(),
            mode,
            start: 0,
            pos: 0,
            line: 1,
            finished: false,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Byte `offset` places ahead of the cursor, or `0` past the end.
    fn look(&self, offset: usize) -> u8 {
        self.bytes.get(self.pos + offset).copied().unwrap_or(0)
    }

    fn bump(&mut self) -> u8 {
        let byte = self.bytes[self.pos];
        self.pos += 1;
        byte
    }

    fn eat_while(&mut self, pred: impl Fn(u8) -> bool) {
        while !self.at_end() && pred(self.look(0)) {
            self.bump();
        }
    }

    /// `long` if the next byte is `=` (consuming it), `short` otherwise.
    fn with_equal(&mut self, long: TokenType, short: TokenType) -> TokenType {
        if self.look(0) == b'=' {
            self.pos += 1;
            long
        } else {
            short
        }
    }

    fn lexeme(&self) -> &'a str {
        &self.src[self.start..self.pos]
    }

    /// Scans the lexeme starting at `self.start`. `Ok(None)` means it produced
    /// no token (whitespace, newline or a skipped comment).
    fn scan_token(&mut self) -> Result<Option<TokenType>> {
        let token_type: TokenType = match self.bump() {
            b'(' => TokenType::LEFT_PAREN,
            b')' => TokenType::RIGHT_PAREN,
            b'{' => TokenType::LEFT_BRACE,
            b'}' => TokenType::RIGHT_BRACE,
            b',' => TokenType::COMMA,
            b'.' => TokenType::DOT,
            b'-' => TokenType::MINUS,
            b'+' => TokenType::PLUS,
            b';' => TokenType::SEMICOLON,
            b'*' => TokenType::STAR,

            b'!' => self.with_equal(TokenType::BANG_EQUAL, TokenType::BANG),
            b'=' => self.with_equal(TokenType::EQUAL_EQUAL, TokenType::EQUAL),
            b'<' => self.with_equal(TokenType::LESS_EQUAL, TokenType::LESS),
            b'>' => self.with_equal(TokenType::GREATER_EQUAL, TokenType::GREATER),

            b'/' if self.look(0) == b'/' => return Ok(self.line_comment()),
            b'/' => TokenType::SLASH,

            b' ' | b'\r' | b'\t' => return Ok(None),

            b'\n' => {
                self.line += 1;
                return Ok(None);
            }

            b'"' => self.string()?,

            b'0'..=b'9' => self.number(),

            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.identifier(),

            _ => {
                // Step over the whole character, not just its first byte.
                let c: char = self.src[self.start..]
                    .chars()
                    .next()
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                self.pos = self.start + c.len_utf8();

                return Err(LoxError::lex(
                    self.line,
                    format!("Unexpected character: {}", c),
                ));
            }
        };

        Ok(Some(token_type))
    }

    /// Jumps to the end of the line. The newline stays unread so the line
    /// counter is only bumped in `scan_token`.
    fn line_comment(&mut self) -> Option<TokenType> {
        self.pos = match memchr(b'\n', &self.bytes[self.pos..]) {
            Some(offset) => self.pos + offset,
            None => self.bytes.len(),
        };

        match self.mode {
            ScanMode::EmitComments => Some(TokenType::COMMENT),
            ScanMode::SkipComments => None,
        }
    }

    fn string(&mut self) -> Result<TokenType> {
        while !self.at_end() && self.look(0) != b'"' {
            if self.bump() == b'\n' {
                self.line += 1;
            }
        }

        if self.at_end() {
            return Err(LoxError::lex(self.line, "Unterminated string."));
        }

        self.pos += 1;

        let contents: &str = &self.src[self.start + 1..self.pos - 1];
        Ok(TokenType::STRING(contents.to_owned()))
    }

    fn number(&mut self) -> TokenType {
        self.eat_while(|b| b.is_ascii_digit());

        if self.look(0) == b'.' && self.look(1).is_ascii_digit() {
            self.pos += 1;
            self.eat_while(|b| b.is_ascii_digit());
        }

        // Digits with at most one interior '.', always a valid f64.
        TokenType::NUMBER(self.lexeme().parse::<f64>().unwrap_or(0.0))
    }

    fn identifier(&mut self) -> TokenType {
        self.eat_while(|b| b.is_ascii_alphanumeric() || b == b'_');

        KEYWORDS
            .get(self.lexeme())
            .cloned()
            .unwrap_or(TokenType::IDENTIFIER)
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        while !self.at_end() {
            self.start = self.pos;

            match self.scan_token() {
                Ok(Some(token_type)) => {
                    debug!("Scanned {:?} on line {}", token_type, self.line);
                    return Some(Ok(Token::new(token_type, self.lexeme(), self.line)));
                }
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }

        self.finished = true;
        Some(Ok(Token::new(TokenType::EOF, "", self.line)))
    }
}

impl<'a> FusedIterator for Scanner<'a> {}

/// Scan `source` eagerly, skipping comments.
pub fn scan(source: &str) -> (Vec<Token>, Vec<LoxError>) {
    scan_with(source, ScanMode::SkipComments)
}

/// Scan `source` eagerly with the given comment policy, splitting the
/// token stream from the lexical errors encountered along the way.
pub fn scan_with(source: &str, mode: ScanMode) -> (Vec<Token>, Vec<LoxError>) {
    let mut tokens: Vec<Token> = Vec::new();
    let mut errors: Vec<LoxError> = Vec::new();

    for result in Scanner::with_mode(source, mode) {
        match result {
            Ok(token) => tokens.push(token),
            Err(e) => errors.push(e),
        }
    }

    info!(
        "Scanned {} token(s) with {} error(s)",
        tokens.len(),
        errors.len()
    );

    (tokens, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_is_single_eof_on_line_one() {
        let (tokens, errors) = scan("");

        assert!(errors.is_empty());
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token_type, TokenType::EOF);
        assert_eq!(tokens[0].line, 1);
    }

    #[test]
    fn eof_line_counts_newlines() {
        let (tokens, _) = scan("var a;\n\nprint a;\n");

        assert_eq!(tokens.last().map(|t| t.line), Some(4));
    }

    #[test]
    fn number_literal_carries_value() {
        let (tokens, _) = scan("12.5 7.");

        assert!(matches!(tokens[0].token_type, TokenType::NUMBER(n) if n == 12.5));
        assert!(matches!(tokens[1].token_type, TokenType::NUMBER(n) if n == 7.0));
        assert_eq!(tokens[2].token_type, TokenType::DOT);
    }

    #[test]
    fn unexpected_multibyte_character_is_one_error() {
        let (tokens, errors) = scan("é+");

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message(), "Unexpected character: é");
        assert_eq!(tokens[0].token_type, TokenType::PLUS);
    }
}

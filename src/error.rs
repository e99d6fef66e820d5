//! Centralised error hierarchy for the **Lox interpreter**.
//!
//! Every stage (scanner, parser, resolver, runtime) turns its failure modes
//! into one of the variants defined here and hands them back to the caller as
//! an explicit list. The binary converts I/O failures through the transparent
//! variants so `?` works on file handling too.
//!
//! The module **does not** print diagnostics itself. Printing is the job of a
//! [`Reporter`] supplied by the driver.

use std::fmt;
use std::io;
use thiserror::Error;

use log::debug;

use crate::token::{Token, TokenType};

/// Where in the source line a static error was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// No token to point at (scanner errors).
    Nowhere,

    /// The error happened at the `EOF` token.
    End,

    /// The error happened at the token with this lexeme.
    Lexeme(String),
}

impl Location {
    /// Location hint for an error reported against `token`.
    pub fn of(token: &Token) -> Self {
        if token.token_type == TokenType::EOF {
            Location::End
        } else {
            Location::Lexeme(token.lexeme.clone())
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Nowhere => Ok(()),
            Location::End => write!(f, " at end"),
            Location::Lexeme(lexeme) => write!(f, " at '{}'", lexeme),
        }
    }
}

/// Canonical error type used throughout the interpreter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoxError {
    /// Lexical (scanner) error with source line information.
    #[error("[line {line}] Error: {message}")]
    Lex {
        /// Human‑readable description.
        message: String,

        /// 1‑based line where the error occurred.
        line: usize,
    },

    /// Syntactic (parser) error.
    #[error("[line {line}] Error{location}: {message}")]
    Parse {
        message: String,
        line: usize,
        location: Location,
    },

    /// Static‑analysis failure found by the resolver.
    #[error("[line {line}] Error{location}: {message}")]
    Resolve {
        message: String,
        line: usize,
        location: Location,
    },

    /// Runtime evaluation error, reported against the offending token's line.
    #[error("{message}\n[line {line}]")]
    Runtime { message: String, line: usize },

    /// Wrapper around `std::io::Error` (transparent).  Enables `?` on I/O ops.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// UTF‑8 decoding failure when ingesting external text.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl LoxError {
    /// Helper constructor for the **scanner**.
    pub fn lex<S: Into<String>>(line: usize, msg: S) -> Self {
        let message: String = msg.into();

        debug!("Creating Lex error: line={}, msg={}", line, message);

        LoxError::Lex { message, line }
    }

    /// Helper constructor for the **parser**.
    pub fn parse<S: Into<String>>(token: &Token, msg: S) -> Self {
        let message: String = msg.into();

        debug!("Creating Parse error: line={}, msg={}", token.line, message);

        LoxError::Parse {
            message,
            line: token.line,
            location: Location::of(token),
        }
    }

    /// Helper constructor for the **resolver**.
    pub fn resolve<S: Into<String>>(token: &Token, msg: S) -> Self {
        let message: String = msg.into();

        debug!("Creating Resolve error: line={}, msg={}", token.line, message);

        LoxError::Resolve {
            message,
            line: token.line,
            location: Location::of(token),
        }
    }

    /// Helper constructor for the **runtime**.
    pub fn runtime<S: Into<String>>(token: &Token, msg: S) -> Self {
        let message: String = msg.into();

        debug!("Creating Runtime error: line={}, msg={}", token.line, message);

        LoxError::Runtime {
            message,
            line: token.line,
        }
    }

    /// The bare message, without any line decoration.
    pub fn message(&self) -> String {
        match self {
            LoxError::Lex { message, .. }
            | LoxError::Parse { message, .. }
            | LoxError::Resolve { message, .. }
            | LoxError::Runtime { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Source line the error points at, when there is one.
    pub fn line(&self) -> Option<usize> {
        match self {
            LoxError::Lex { line, .. }
            | LoxError::Parse { line, .. }
            | LoxError::Resolve { line, .. }
            | LoxError::Runtime { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Crate‑wide `Result` alias.
pub type Result<T> = std::result::Result<T, LoxError>;

/// Diagnostic sink supplied by the driver.
///
/// The core only ever hands over structured `(line, location, message)`
/// triples; turning them into text is up to the implementor.
pub trait Reporter {
    /// A static error at `line`, optionally pointing at a location.
    fn error(&mut self, line: usize, location: &Location, message: &str);

    /// A runtime error raised at `line`.
    fn runtime_error(&mut self, line: usize, message: &str);

    /// A static error reported against a token.
    fn error_at(&mut self, token: &Token, message: &str) {
        self.error(token.line, &Location::of(token), message);
    }

    /// Route any [`LoxError`] to the matching callback.
    fn report(&mut self, err: &LoxError) {
        match err {
            LoxError::Lex { message, line } => self.error(*line, &Location::Nowhere, message),
            LoxError::Parse {
                message,
                line,
                location,
            }
            | LoxError::Resolve {
                message,
                line,
                location,
            } => self.error(*line, location, message),
            LoxError::Runtime { message, line } => self.runtime_error(*line, message),
            other => self.error(0, &Location::Nowhere, &other.to_string()),
        }
    }
}

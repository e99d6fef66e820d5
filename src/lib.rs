//! Tree‑walking interpreter for the Lox scripting language.
//!
//! The pipeline is four stages, each usable on its own:
//!
//! 1. [`scanner::scan`]: source text → tokens + lexical errors
//! 2. [`parser::parse`]: tokens → statements + syntax errors
//! 3. [`resolver::resolve`]: statements → scope‑distance side table + static errors
//! 4. [`interpreter::Interpreter::interpret`]: statements + side table → output or a runtime error
//!
//! [`run`] chains them the way a driver wants: it stops before execution as
//! soon as a static stage reported anything, and routes every diagnostic
//! through a caller‑supplied [`Reporter`].

pub mod ast_printer;
pub mod callable;
pub mod environment;
pub mod error;
pub mod expr;
pub mod interpreter;
pub mod parser;
pub mod resolver;
pub mod scanner;
pub mod stmt;
pub mod token;
pub mod value;

use std::io::Write;

use log::info;

pub use error::{Location, LoxError, Reporter};
pub use interpreter::Interpreter;

/// Which kinds of error one batch produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStatus {
    /// A lexical, syntax or resolution error; nothing was executed.
    pub had_error: bool,

    /// Execution started and was aborted by a runtime error.
    pub had_runtime_error: bool,
}

impl RunStatus {
    /// Conventional process exit code: 65 for static errors, 70 for runtime
    /// errors, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.had_error {
            65
        } else if self.had_runtime_error {
            70
        } else {
            0
        }
    }
}

/// Scan, parse, resolve and execute one batch of source.
pub fn run<W: Write, R: Reporter + ?Sized>(
    source: &str,
    interpreter: &mut Interpreter<W>,
    reporter: &mut R,
) -> RunStatus {
    let mut status = RunStatus::default();

    let (tokens, lex_errors) = scanner::scan(source);
    let (statements, parse_errors) = parser::parse(tokens);

    for err in lex_errors.iter().chain(parse_errors.iter()) {
        reporter.report(err);
    }

    if !lex_errors.is_empty() || !parse_errors.is_empty() {
        info!(
            "Rejecting batch: {} lexical and {} syntax error(s)",
            lex_errors.len(),
            parse_errors.len()
        );
        status.had_error = true;
        return status;
    }

    let (locals, resolve_errors) = resolver::resolve(&statements);

    if !resolve_errors.is_empty() {
        for err in &resolve_errors {
            reporter.report(err);
        }

        info!("Rejecting batch: {} resolution error(s)", resolve_errors.len());
        status.had_error = true;
        return status;
    }

    if let Err(err) = interpreter.interpret(&statements, locals) {
        reporter.report(&err);
        status.had_runtime_error = true;
    }

    status
}

//! Expression nodes of the Lox AST.
//!
//! Nodes are immutable once the parser has built them. The four nodes that
//! name a variable (`Variable`, `Assign`, `This`, `Super`) carry an [`ExprId`]
//! so the resolver can record their scope distance in a side table without
//! touching the tree.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::token::Token;

static NEXT_EXPR_ID: AtomicUsize = AtomicUsize::new(0);

/// Identity of a variable‑referencing expression node.
///
/// Ids come from one process‑wide counter, so nodes parsed in different
/// batches (REPL lines) never collide in the interpreter's side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(usize);

impl ExprId {
    /// Allocate a fresh, never‑before‑used id.
    pub fn fresh() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A **literal constant** that appears directly in the source code.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    /// Numeric literal, always an IEEE‑754 `f64`.
    Number(f64),

    /// String literal without surrounding quotes.
    Str(String),

    /// `true` or `false`.
    Bool(bool),

    /// The `nil` literal.
    Nil,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `left op right` for arithmetic, comparison and equality operators.
    Binary {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },

    /// `!right` or `-right`.
    Unary { operator: Token, right: Box<Expr> },

    Literal(LiteralValue),

    /// Parenthesised sub‑expression.
    Grouping(Box<Expr>),

    /// Read of a named variable.
    Variable { id: ExprId, name: Token },

    /// `name = value`
    Assign {
        id: ExprId,
        name: Token,
        value: Box<Expr>,
    },

    /// Short‑circuiting `and` / `or`.
    Logical {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },

    /// `callee(arguments)`; `paren` is the closing `)` kept for error lines.
    Call {
        callee: Box<Expr>,
        paren: Token,
        arguments: Vec<Expr>,
    },

    /// object.property
    Get { object: Box<Expr>, name: Token },

    /// object.property = value
    Set {
        object: Box<Expr>,
        name: Token,
        value: Box<Expr>,
    },

    /// The `this` keyword inside a method.
    This { id: ExprId, keyword: Token },

    /// `super.method`
    Super {
        id: ExprId,
        keyword: Token,
        method: Token,
    },
}

impl Expr {
    pub fn variable(name: Token) -> Self {
        Expr::Variable {
            id: ExprId::fresh(),
            name,
        }
    }

    pub fn assign(name: Token, value: Expr) -> Self {
        Expr::Assign {
            id: ExprId::fresh(),
            name,
            value: Box::new(value),
        }
    }

    pub fn this(keyword: Token) -> Self {
        Expr::This {
            id: ExprId::fresh(),
            keyword,
        }
    }

    pub fn super_method(keyword: Token, method: Token) -> Self {
        Expr::Super {
            id: ExprId::fresh(),
            keyword,
            method,
        }
    }
}

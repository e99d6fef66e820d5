use std::rc::Rc;

use crate::expr::Expr;
use crate::token::Token;

/// A function or method declaration.
///
/// Shared behind an `Rc` because every closure created from it keeps the
/// declaration alive after the statement list that produced it is gone.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Token,

    /// Parameter name tokens (arity ≤ 255).
    pub params: Vec<Token>,

    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Stand‑alone expression terminated by a semicolon.
    Expression(Expr),

    Print(Expr),

    /// `var name (= initializer)?;`
    Var {
        name: Token,
        initializer: Option<Expr>,
    },

    Block(Vec<Stmt>),

    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    /// `while` loop; `for` loops are desugared into this as well.
    While { condition: Expr, body: Box<Stmt> },

    Function(Rc<FunctionDecl>),

    /// `return value?;` with the keyword kept for error locations.
    Return {
        keyword: Token,
        value: Option<Expr>,
    },

    /// `class name (< superclass)? { methods }`
    ///
    /// `superclass` is always an `Expr::Variable` when present.
    Class {
        name: Token,
        superclass: Option<Expr>,
        methods: Vec<Rc<FunctionDecl>>,
    },
}

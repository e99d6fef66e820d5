//! Tree‑walking evaluator.
//!
//! The interpreter owns the global environment, the merged resolver side
//! table, and the output sink that `print` writes to. One call to
//! [`Interpreter::interpret`] is one batch: the first runtime error aborts
//! the rest of that batch and is handed back to the caller, while globals
//! defined so far stay in place for the next batch.
//!
//! # Recursion
//!
//! Every Lox call recurses on the native stack, so two limits apply and
//! either one raises "Stack overflow.":
//!
//! - `max_call_depth`, the number of nested Lox calls;
//! - `stack_budget`, the bytes of native stack a batch may use, measured
//!   from where [`Interpreter::interpret`] was entered.
//!
//! The defaults fit a 2 MiB thread (the size of threads spawned by `std`).
//! Embedders that raise the call depth must run the interpreter on a thread
//! with a larger stack and raise the budget to match, as `main.rs` does.

use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use log::{debug, info};

use crate::callable::{Callable, LoxClass, LoxFunction, LoxInstance, INITIALIZER};
use crate::environment::{EnvRef, Environment};
use crate::error::{LoxError, Result};
use crate::expr::{Expr, ExprId};
use crate::resolver::Locals;
use crate::stmt::{FunctionDecl, Stmt};
use crate::token::{Token, TokenType};
use crate::value::Value;

/// Default limit on nested Lox calls before "Stack overflow." is raised.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Default native stack budget for one batch, in bytes.
pub const DEFAULT_STACK_BUDGET: usize = 1536 * 1024;

/// How a statement finished.
#[derive(Debug)]
enum Completion {
    Normal,

    /// A `return` is unwinding towards the nearest call boundary.
    Return(Value),
}

pub struct Interpreter<W: Write> {
    globals: EnvRef,
    environment: EnvRef,
    locals: Locals,
    out: W,
    call_depth: usize,
    max_call_depth: usize,
    stack_base: usize,
    stack_budget: usize,
}

impl<W: Write> Interpreter<W> {
    /// Creates a new interpreter whose `print` output goes to `out`.
    pub fn new(out: W) -> Self {
        info!("Initializing Interpreter");

        let globals: EnvRef = Environment::new().into_ref();

        Self {
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
            out,
            call_depth: 0,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            stack_base: stack_position(),
            stack_budget: DEFAULT_STACK_BUDGET,
        }
    }

    /// Cap the number of nested calls a batch may make.
    pub fn with_max_depth(mut self, limit: usize) -> Self {
        self.max_call_depth = limit;
        self
    }

    /// Cap the native stack, in bytes, a batch may use.
    pub fn with_stack_budget(mut self, bytes: usize) -> Self {
        self.stack_budget = bytes;
        self
    }

    /// Number of Lox calls currently on the stack.
    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Executes one batch of top‑level statements.
    ///
    /// `locals` is the resolver's side table for exactly these statements;
    /// it is merged into the tables of earlier batches.
    pub fn interpret(&mut self, statements: &[Stmt], locals: Locals) -> Result<()> {
        debug!(
            "Interpreting {} statement(s) with {} resolved local(s)",
            statements.len(),
            locals.len()
        );

        self.locals.extend(locals);
        self.call_depth = 0;
        self.stack_base = stack_position();

        for stmt in statements {
            if let Err(e) = self.execute(stmt) {
                info!("Batch aborted by runtime error: {}", e.message());

                self.environment = Rc::clone(&self.globals);
                return Err(e);
            }
        }

        self.out.flush()?;

        info!("Interpretation completed successfully");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────────

    // Arms stay single calls: this frame repeats at every level of Lox recursion.
    fn execute(&mut self, stmt: &Stmt) -> Result<Completion> {
        match stmt {
            Stmt::Expression(expr) => self.execute_expression(expr),

            Stmt::Print(expr) => self.execute_print(expr),

            Stmt::Var { name, initializer } => self.execute_var(name, initializer.as_ref()),

            Stmt::Block(statements) => self.execute_scoped(statements),

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => self.execute_if(condition, then_branch, else_branch.as_deref()),

            Stmt::While { condition, body } => self.execute_while(condition, body),

            Stmt::Function(declaration) => self.execute_function(declaration),

            Stmt::Return { value, .. } => self.execute_return(value.as_ref()),

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.define_class(name, superclass.as_ref(), methods),
        }
    }

    fn execute_expression(&mut self, expr: &Expr) -> Result<Completion> {
        self.evaluate(expr)?;
        Ok(Completion::Normal)
    }

    fn execute_print(&mut self, expr: &Expr) -> Result<Completion> {
        let value: Value = self.evaluate(expr)?;
        writeln!(self.out, "{}", value)?;

        Ok(Completion::Normal)
    }

    fn execute_var(&mut self, name: &Token, initializer: Option<&Expr>) -> Result<Completion> {
        let value: Value = match initializer {
            Some(expr) => self.evaluate(expr)?,
            None => Value::Nil,
        };

        debug!("Defining variable '{}' = {}", name.lexeme, value);
        self.environment.borrow_mut().define(&name.lexeme, value);

        Ok(Completion::Normal)
    }

    fn execute_scoped(&mut self, statements: &[Stmt]) -> Result<Completion> {
        let scope = Environment::with_enclosing(Rc::clone(&self.environment));
        self.execute_block(statements, scope.into_ref())
    }

    fn execute_if(
        &mut self,
        condition: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) -> Result<Completion> {
        if self.evaluate(condition)?.is_truthy() {
            self.execute(then_branch)
        } else if let Some(else_branch) = else_branch {
            self.execute(else_branch)
        } else {
            Ok(Completion::Normal)
        }
    }

    fn execute_while(&mut self, condition: &Expr, body: &Stmt) -> Result<Completion> {
        while self.evaluate(condition)?.is_truthy() {
            if let Completion::Return(value) = self.execute(body)? {
                return Ok(Completion::Return(value));
            }
        }

        Ok(Completion::Normal)
    }

    fn execute_function(&mut self, declaration: &Rc<FunctionDecl>) -> Result<Completion> {
        debug!("Defining function '{}'", declaration.name.lexeme);

        let function =
            LoxFunction::new(Rc::clone(declaration), Rc::clone(&self.environment), false);
        self.environment.borrow_mut().define(
            &declaration.name.lexeme,
            Value::Callable(Callable::Function(Rc::new(function))),
        );

        Ok(Completion::Normal)
    }

    fn execute_return(&mut self, value: Option<&Expr>) -> Result<Completion> {
        let value: Value = match value {
            Some(expr) => self.evaluate(expr)?,
            None => Value::Nil,
        };

        Ok(Completion::Return(value))
    }

    /// Runs `statements` with `environment` active, restoring the previous
    /// environment on every exit path.
    fn execute_block(&mut self, statements: &[Stmt], environment: EnvRef) -> Result<Completion> {
        let previous: EnvRef = std::mem::replace(&mut self.environment, environment);
        let result = self.execute_all(statements);
        self.environment = previous;

        result
    }

    fn execute_all(&mut self, statements: &[Stmt]) -> Result<Completion> {
        for stmt in statements {
            if let Completion::Return(value) = self.execute(stmt)? {
                return Ok(Completion::Return(value));
            }
        }

        Ok(Completion::Normal)
    }

    fn define_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<Completion> {
        let superclass: Option<Rc<LoxClass>> = match superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Callable(Callable::Class(class)) => Some(class),
                _ => {
                    let token: &Token = match expr {
                        Expr::Variable { name, .. } => name,
                        _ => name,
                    };
                    return Err(LoxError::runtime(token, "Superclass must be a class."));
                }
            },
            None => None,
        };

        self.environment
            .borrow_mut()
            .define(&name.lexeme, Value::Nil);

        // Methods of a subclass close over an extra frame that binds `super`.
        let method_env: EnvRef = match &superclass {
            Some(superclass) => {
                let mut env = Environment::with_enclosing(Rc::clone(&self.environment));
                env.define("super", Value::Callable(Callable::Class(Rc::clone(superclass))));
                env.into_ref()
            }
            None => Rc::clone(&self.environment),
        };

        let methods: HashMap<String, Rc<LoxFunction>> = methods
            .iter()
            .map(|declaration| {
                let is_initializer: bool = declaration.name.lexeme == INITIALIZER;
                let function =
                    LoxFunction::new(Rc::clone(declaration), Rc::clone(&method_env), is_initializer);

                (declaration.name.lexeme.clone(), Rc::new(function))
            })
            .collect();

        debug!(
            "Defining class '{}' with {} method(s)",
            name.lexeme,
            methods.len()
        );

        let class = LoxClass::new(name.lexeme.clone(), superclass, methods);
        self.environment.borrow_mut().define(
            &name.lexeme,
            Value::Callable(Callable::Class(Rc::new(class))),
        );

        Ok(Completion::Normal)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────────

    /// Evaluates an expression and returns a Value.
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(literal) => Ok(Value::from(literal)),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { operator, right } => self.evaluate_unary(operator, right),

            Expr::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, operator, right),

            Expr::Logical {
                left,
                operator,
                right,
            } => self.evaluate_logical(left, operator, right),

            Expr::Variable { id, name } => self.look_up_variable(*id, name),

            Expr::Assign { id, name, value } => self.evaluate_assign(*id, name, value),

            Expr::Call {
                callee,
                paren,
                arguments,
            } => self.evaluate_call(callee, paren, arguments),

            Expr::Get { object, name } => self.evaluate_get(object, name),

            Expr::Set {
                object,
                name,
                value,
            } => self.evaluate_set(object, name, value),

            Expr::This { id, keyword } => self.look_up_variable(*id, keyword),

            Expr::Super {
                id,
                keyword,
                method,
            } => self.evaluate_super(*id, keyword, method),
        }
    }

    fn evaluate_unary(&mut self, operator: &Token, right: &Expr) -> Result<Value> {
        let right: Value = self.evaluate(right)?;
        apply_unary(operator, right)
    }

    fn evaluate_binary(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Result<Value> {
        let left: Value = self.evaluate(left)?;
        let right: Value = self.evaluate(right)?;
        apply_binary(operator, left, right)
    }

    fn evaluate_logical(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Result<Value> {
        let left: Value = self.evaluate(left)?;

        let short_circuit: bool = match operator.token_type {
            TokenType::OR => left.is_truthy(),
            _ => !left.is_truthy(),
        };

        if short_circuit {
            Ok(left)
        } else {
            self.evaluate(right)
        }
    }

    fn evaluate_assign(&mut self, id: ExprId, name: &Token, value: &Expr) -> Result<Value> {
        let value: Value = self.evaluate(value)?;

        match self.locals.get(&id) {
            Some(distance) => {
                Environment::assign_at(&self.environment, *distance, name, value.clone())?
            }
            None => self.globals.borrow_mut().assign(name, value.clone())?,
        }

        Ok(value)
    }

    fn evaluate_call(&mut self, callee: &Expr, paren: &Token, arguments: &[Expr]) -> Result<Value> {
        let callee: Value = self.evaluate(callee)?;

        let mut args: Vec<Value> = Vec::with_capacity(arguments.len());
        for arg in arguments {
            args.push(self.evaluate(arg)?);
        }

        self.call(callee, paren, args)
    }

    fn evaluate_get(&mut self, object: &Expr, name: &Token) -> Result<Value> {
        match self.evaluate(object)? {
            Value::Instance(instance) => instance.get(name),
            _ => Err(LoxError::runtime(name, "Only instances have properties.")),
        }
    }

    fn evaluate_set(&mut self, object: &Expr, name: &Token, value: &Expr) -> Result<Value> {
        let Value::Instance(instance) = self.evaluate(object)? else {
            return Err(LoxError::runtime(name, "Only instances have fields."));
        };

        let value: Value = self.evaluate(value)?;
        instance.set(name, value.clone());

        Ok(value)
    }

    fn look_up_variable(&self, id: ExprId, name: &Token) -> Result<Value> {
        match self.locals.get(&id) {
            Some(distance) => Environment::get_at(&self.environment, *distance, name),
            None => self.globals.borrow().get(name),
        }
    }

    /// `super.method` binds the superclass method to the current `this`.
    fn evaluate_super(&self, id: ExprId, keyword: &Token, method: &Token) -> Result<Value> {
        let distance: usize = *self
            .locals
            .get(&id)
            .ok_or_else(|| LoxError::runtime(keyword, "Undefined variable 'super'."))?;

        let superclass: Value = Environment::get_at(&self.environment, distance, keyword)?;

        // `this` always lives in the frame just inside the one holding `super`.
        let this = Token::synthetic("this", keyword.line);
        let object: Value =
            Environment::get_at(&self.environment, distance.saturating_sub(1), &this)?;

        let (Value::Callable(Callable::Class(superclass)), Value::Instance(instance)) =
            (superclass, object)
        else {
            return Err(LoxError::runtime(
                keyword,
                "Can't use 'super' outside of a subclass method.",
            ));
        };

        let found: Rc<LoxFunction> = superclass.find_method(&method.lexeme).ok_or_else(|| {
            LoxError::runtime(method, format!("Undefined property '{}'.", method.lexeme))
        })?;

        Ok(Value::Callable(Callable::Function(Rc::new(
            found.bind(instance),
        ))))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calls
    // ─────────────────────────────────────────────────────────────────────────

    fn call(&mut self, callee: Value, paren: &Token, args: Vec<Value>) -> Result<Value> {
        let callable: Callable = match callee {
            Value::Callable(callable) => callable,
            other => return Err(not_callable(paren, &other)),
        };

        if args.len() != callable.arity() {
            return Err(arity_mismatch(paren, callable.arity(), args.len()));
        }

        match callable {
            Callable::Function(function) => self.call_function(&function, args, paren),
            Callable::Class(class) => self.instantiate(class, args, paren),
        }
    }

    fn instantiate(&mut self, class: Rc<LoxClass>, args: Vec<Value>, paren: &Token) -> Result<Value> {
        debug!("Instantiating class '{}'", class.name);

        let instance: Rc<LoxInstance> = Rc::new(LoxInstance::new(Rc::clone(&class)));

        if let Some(initializer) = class.find_method(INITIALIZER) {
            let bound: LoxFunction = initializer.bind(Rc::clone(&instance));
            self.call_function(&bound, args, paren)?;
        }

        Ok(Value::Instance(instance))
    }

    fn call_function(
        &mut self,
        function: &LoxFunction,
        args: Vec<Value>,
        paren: &Token,
    ) -> Result<Value> {
        if self.call_depth >= self.max_call_depth || self.stack_used() > self.stack_budget {
            return Err(stack_overflow(paren, self.call_depth, self.stack_used()));
        }

        debug!(
            "Calling '{}' at depth {}",
            function.name(),
            self.call_depth + 1
        );

        let mut environment = Environment::with_enclosing(Rc::clone(function.closure()));
        for (param, arg) in function.declaration().params.iter().zip(args) {
            environment.define(&param.lexeme, arg);
        }

        self.call_depth += 1;
        let result = self.execute_block(&function.declaration().body, environment.into_ref());
        self.call_depth -= 1;

        let completion: Completion = result?;

        if function.is_initializer() {
            return function.bound_this();
        }

        Ok(match completion {
            Completion::Return(value) => value,
            Completion::Normal => Value::Nil,
        })
    }

    /// Native stack consumed since the current batch started.
    fn stack_used(&self) -> usize {
        self.stack_base.abs_diff(stack_position())
    }
}

/// Address of a local in the caller's frame, for measuring stack growth.
#[inline(never)]
fn stack_position() -> usize {
    let marker: u8 = 0;
    std::hint::black_box(&marker) as *const u8 as usize
}

fn apply_unary(operator: &Token, right: Value) -> Result<Value> {
    match operator.token_type {
        TokenType::BANG => Ok(Value::Bool(!right.is_truthy())),

        TokenType::MINUS => match right {
            Value::Number(n) => Ok(Value::Number(-n)),
            _ => Err(LoxError::runtime(operator, "Operand must be a number.")),
        },

        _ => Err(LoxError::runtime(
            operator,
            format!("Invalid unary operator '{}'.", operator.lexeme),
        )),
    }
}

fn apply_binary(operator: &Token, left: Value, right: Value) -> Result<Value> {
    match operator.token_type {
        TokenType::PLUS => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(a), Value::String(b)) => {
                let joined: String = format!("{}{}", a, b);
                Ok(Value::String(Rc::from(joined)))
            }
            _ => Err(LoxError::runtime(
                operator,
                "Operands must be two numbers or two strings.",
            )),
        },

        TokenType::MINUS => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Ok(Value::Number(a - b))
        }

        TokenType::STAR => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Ok(Value::Number(a * b))
        }

        // IEEE semantics: dividing by zero yields an infinity or NaN.
        TokenType::SLASH => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Ok(Value::Number(a / b))
        }

        TokenType::GREATER => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Ok(Value::Bool(a > b))
        }

        TokenType::GREATER_EQUAL => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Ok(Value::Bool(a >= b))
        }

        TokenType::LESS => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Ok(Value::Bool(a < b))
        }

        TokenType::LESS_EQUAL => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Ok(Value::Bool(a <= b))
        }

        TokenType::EQUAL_EQUAL => Ok(Value::Bool(left == right)),

        TokenType::BANG_EQUAL => Ok(Value::Bool(left != right)),

        _ => Err(LoxError::runtime(
            operator,
            format!("Invalid binary operator '{}'.", operator.lexeme),
        )),
    }
}

fn number_operands(operator: &Token, left: &Value, right: &Value) -> Result<(f64, f64)> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(LoxError::runtime(operator, "Operands must be numbers.")),
    }
}

#[cold]
fn not_callable(paren: &Token, callee: &Value) -> LoxError {
    LoxError::runtime(
        paren,
        format!(
            "Can only call functions and classes, not {}.",
            callee.type_name()
        ),
    )
}

#[cold]
fn arity_mismatch(paren: &Token, expected: usize, got: usize) -> LoxError {
    LoxError::runtime(
        paren,
        format!("Expected {} arguments but got {}.", expected, got),
    )
}

#[cold]
fn stack_overflow(paren: &Token, depth: usize, stack_used: usize) -> LoxError {
    info!(
        "Stack overflow at call depth {} ({} bytes of native stack)",
        depth, stack_used
    );

    LoxError::runtime(paren, "Stack overflow.")
}

use crate::error::{LoxError, Result};
use crate::token::Token;
use crate::value::Value;
use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Shared handle to a scope frame. Closures and bound methods hold on to
/// these, so a frame lives as long as anything can still reach it.
pub type EnvRef = Rc<RefCell<Environment>>;

/// One scope frame in the environment chain.
#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<EnvRef>,
}

impl Environment {
    /// The global (root) frame.
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(enclosing: EnvRef) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> EnvRef {
        Rc::new(RefCell::new(self))
    }

    /// Bind `name` in this frame, replacing any previous binding here.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Dynamic lookup, walking outwards until the name is found.
    pub fn get(&self, name: &Token) -> Result<Value> {
        if let Some(value) = self.values.get(&name.lexeme) {
            Ok(value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(name)
        } else {
            Err(undefined_variable(name))
        }
    }

    /// Dynamic assignment to the nearest frame that already binds `name`.
    pub fn assign(&mut self, name: &Token, value: Value) -> Result<()> {
        if let Some(slot) = self.values.get_mut(&name.lexeme) {
            *slot = value;
            Ok(())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(name, value)
        } else {
            Err(undefined_variable(name))
        }
    }

    /// Read `name` from the frame exactly `distance` hops out from `env`.
    pub fn get_at(env: &EnvRef, distance: usize, name: &Token) -> Result<Value> {
        let frame: EnvRef = Self::ancestor(env, distance, name)?;
        let value = frame.borrow().values.get(&name.lexeme).cloned();

        value.ok_or_else(|| undefined_variable(name))
    }

    /// Write `name` into the frame exactly `distance` hops out from `env`.
    pub fn assign_at(env: &EnvRef, distance: usize, name: &Token, value: Value) -> Result<()> {
        let frame: EnvRef = Self::ancestor(env, distance, name)?;
        frame.borrow_mut().values.insert(name.lexeme.clone(), value);

        Ok(())
    }

    /// The resolver guarantees the chain is at least `distance` deep; a
    /// shorter chain means the side table and the runtime disagree.
    fn ancestor(env: &EnvRef, distance: usize, name: &Token) -> Result<EnvRef> {
        let mut frame: EnvRef = Rc::clone(env);

        for _ in 0..distance {
            let next: Option<EnvRef> = frame.borrow().enclosing.clone();

            frame = next.ok_or_else(|| {
                debug!(
                    "Environment chain shorter than {} while resolving '{}'",
                    distance, name.lexeme
                );
                undefined_variable(name)
            })?;
        }

        Ok(frame)
    }
}

fn undefined_variable(name: &Token) -> LoxError {
    LoxError::runtime(name, format!("Undefined variable '{}'.", name.lexeme))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Token {
        Token::synthetic(name, 1)
    }

    #[test]
    fn inner_frame_shadows_outer() {
        let globals: EnvRef = Environment::new().into_ref();
        globals.borrow_mut().define("a", Value::Number(1.0));

        let inner: EnvRef = Environment::with_enclosing(Rc::clone(&globals)).into_ref();
        inner.borrow_mut().define("a", Value::Number(2.0));

        assert_eq!(inner.borrow().get(&ident("a")).ok(), Some(Value::Number(2.0)));
        assert_eq!(
            Environment::get_at(&inner, 1, &ident("a")).ok(),
            Some(Value::Number(1.0))
        );
    }

    #[test]
    fn assign_walks_to_defining_frame() {
        let globals: EnvRef = Environment::new().into_ref();
        globals.borrow_mut().define("a", Value::Nil);

        let inner: EnvRef = Environment::with_enclosing(Rc::clone(&globals)).into_ref();
        assert!(inner.borrow_mut().assign(&ident("a"), Value::Bool(true)).is_ok());

        assert_eq!(globals.borrow().get(&ident("a")).ok(), Some(Value::Bool(true)));
    }

    #[test]
    fn undefined_names_are_runtime_errors() {
        let globals: EnvRef = Environment::new().into_ref();

        let err = globals.borrow().get(&ident("nope")).unwrap_err();
        assert_eq!(err.message(), "Undefined variable 'nope'.");

        let err = globals
            .borrow_mut()
            .assign(&ident("nope"), Value::Nil)
            .unwrap_err();
        assert_eq!(err.message(), "Undefined variable 'nope'.");
    }
}

use crate::expr::{Expr, LiteralValue};
use crate::stmt::{FunctionDecl, Stmt};

/// Renders the AST in a parenthesised prefix form, e.g. `(+ 1.0 (group 2.0))`.
///
/// Debugging aid only; the output is not meant to be parsed back.
pub struct AstPrinter;

impl AstPrinter {
    pub fn print(expr: &Expr) -> String {
        match expr {
            // ── literals ────────────────────────────────────────────────
            Expr::Literal(lit) => match lit {
                LiteralValue::Bool(b) => b.to_string(),

                LiteralValue::Nil => "nil".into(),

                LiteralValue::Str(s) => s.clone(),

                LiteralValue::Number(n) => {
                    if n.fract() == 0.0 {
                        // 3 → 3.0
                        format!("{:.1}", n)
                    } else {
                        n.to_string()
                    }
                }
            },

            Expr::Grouping(inner) => format!("(group {})", Self::print(inner)),

            Expr::Unary { operator, right } => {
                format!("({} {})", operator.lexeme, Self::print(right))
            }

            Expr::Binary {
                left,
                operator,
                right,
            }
            | Expr::Logical {
                left,
                operator,
                right,
            } => format!(
                "({} {} {})",
                operator.lexeme,
                Self::print(left),
                Self::print(right)
            ),

            Expr::Variable { name, .. } => name.lexeme.clone(),

            Expr::Assign { name, value, .. } => {
                format!("(= {} {})", name.lexeme, Self::print(value))
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                let mut s = format!("(call {}", Self::print(callee));
                for arg in arguments {
                    s.push(' ');
                    s.push_str(&Self::print(arg));
                }
                s.push(')');
                s
            }

            Expr::Get { object, name } => format!("(. {} {})", Self::print(object), name.lexeme),

            Expr::Set {
                object,
                name,
                value,
            } => format!(
                "(= (. {} {}) {})",
                Self::print(object),
                name.lexeme,
                Self::print(value)
            ),

            Expr::This { .. } => "this".into(),

            Expr::Super { method, .. } => format!("(super {})", method.lexeme),
        }
    }

    pub fn print_stmt(stmt: &Stmt) -> String {
        match stmt {
            Stmt::Expression(expr) => format!("(; {})", Self::print(expr)),

            Stmt::Print(expr) => format!("(print {})", Self::print(expr)),

            Stmt::Var { name, initializer } => match initializer {
                Some(init) => format!("(var {} {})", name.lexeme, Self::print(init)),
                None => format!("(var {})", name.lexeme),
            },

            Stmt::Block(statements) => {
                let mut s = String::from("(block");
                for stmt in statements {
                    s.push(' ');
                    s.push_str(&Self::print_stmt(stmt));
                }
                s.push(')');
                s
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => match else_branch {
                Some(else_branch) => format!(
                    "(if {} {} {})",
                    Self::print(condition),
                    Self::print_stmt(then_branch),
                    Self::print_stmt(else_branch)
                ),
                None => format!(
                    "(if {} {})",
                    Self::print(condition),
                    Self::print_stmt(then_branch)
                ),
            },

            Stmt::While { condition, body } => format!(
                "(while {} {})",
                Self::print(condition),
                Self::print_stmt(body)
            ),

            Stmt::Function(declaration) => format!("(fun {})", Self::print_function(declaration)),

            Stmt::Return { value, .. } => match value {
                Some(value) => format!("(return {})", Self::print(value)),
                None => "(return)".into(),
            },

            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                let mut s = format!("(class {}", name.lexeme);
                if let Some(superclass) = superclass {
                    s.push_str(&format!(" < {}", Self::print(superclass)));
                }
                for method in methods {
                    s.push_str(&format!(" ({})", Self::print_function(method)));
                }
                s.push(')');
                s
            }
        }
    }

    fn print_function(declaration: &FunctionDecl) -> String {
        let params: Vec<&str> = declaration
            .params
            .iter()
            .map(|p| p.lexeme.as_str())
            .collect();

        let mut s = format!("{} ({})", declaration.name.lexeme, params.join(" "));
        for stmt in &declaration.body {
            s.push(' ');
            s.push_str(&Self::print_stmt(stmt));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::scanner::scan;

    fn print_program(source: &str) -> Vec<String> {
        let (tokens, _) = scan(source);
        let (stmts, errors) = parse(tokens);
        assert!(errors.is_empty(), "{:?}", errors);

        stmts.iter().map(AstPrinter::print_stmt).collect()
    }

    #[test]
    fn expressions_print_in_prefix_form() {
        assert_eq!(
            print_program("-1 * (2 + 3.5);"),
            vec!["(; (* (- 1.0) (group (+ 2.0 3.5))))"]
        );
        assert_eq!(
            print_program("a = b or c.d(1);"),
            vec!["(; (= a (or b (call (. c d) 1.0))))"]
        );
    }

    #[test]
    fn statements_print_in_prefix_form() {
        assert_eq!(
            print_program("class B < A { f(x) { return super.f(x); } }"),
            vec!["(class B < A (f (x) (return (call (super f) x))))"]
        );
        assert_eq!(
            print_program("if (x) print \"y\"; else { var z; }"),
            vec!["(if x (print y) (block (var z)))"]
        );
    }
}

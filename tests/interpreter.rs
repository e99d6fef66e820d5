use std::thread;

use rox::interpreter::{Interpreter, DEFAULT_MAX_CALL_DEPTH};
use rox::{Location, Reporter, RunStatus};

/// Collects diagnostics as plain strings so tests can assert on them.
#[derive(Default)]
struct Collected {
    errors: Vec<String>,
    runtime_errors: Vec<(usize, String)>,
}

impl Reporter for Collected {
    fn error(&mut self, line: usize, location: &Location, message: &str) {
        self.errors
            .push(format!("[line {}] Error{}: {}", line, location, message));
    }

    fn runtime_error(&mut self, line: usize, message: &str) {
        self.runtime_errors.push((line, message.to_string()));
    }
}

struct Outcome {
    output: String,
    status: RunStatus,
    reported: Collected,
}

// run lox code using a fresh interpreter and capture the program output
fn run(code: &str) -> Outcome {
    let mut interpreter = Interpreter::new(Vec::new());
    let mut reported = Collected::default();
    let status = rox::run(code, &mut interpreter, &mut reported);

    let output = String::from_utf8(interpreter.into_output()).expect("output is UTF-8");

    Outcome {
        output,
        status,
        reported,
    }
}

fn run_ok(code: &str) -> String {
    let outcome = run(code);

    assert_eq!(
        outcome.status,
        RunStatus::default(),
        "unexpected errors: {:?} {:?}",
        outcome.reported.errors,
        outcome.reported.runtime_errors
    );

    outcome.output
}

fn runtime_error(code: &str) -> (usize, String) {
    let outcome = run(code);

    assert!(outcome.status.had_runtime_error, "expected a runtime error");
    assert!(!outcome.status.had_error);

    outcome.reported.runtime_errors[0].clone()
}

#[test]
fn arithmetic_and_printing() {
    let output = run_ok(
        "print 1 + 2;\n\
         print 10 / 4;\n\
         print -3 * 2;\n\
         print (1 + 2) * 3 - 4 / 2;\n\
         print \"a\" + \"b\";\n\
         print nil;\n\
         print !true;",
    );

    assert_eq!(output, "3\n2.5\n-6\n7\nab\nnil\nfalse\n");
}

#[test]
fn number_literals_print_in_shortest_form() {
    let cases = [
        ("0", "0"),
        ("7", "7"),
        ("3.5", "3.5"),
        ("0.25", "0.25"),
        ("123.456", "123.456"),
        ("10.0", "10"),
        ("1000000", "1000000"),
        ("100000000000000000000000", "100000000000000000000000"),
    ];

    for (literal, printed) in cases {
        let output = run_ok(&format!("print {};", literal));
        assert_eq!(output, format!("{}\n", printed), "literal {}", literal);
    }
}

#[test]
fn comparison_and_equality() {
    let output = run_ok(
        "print 1 < 2;\n\
         print 2 <= 1;\n\
         print 1 == 1;\n\
         print \"1\" == 1;\n\
         print nil == nil;\n\
         print nil == false;\n\
         print \"x\" != \"y\";",
    );

    assert_eq!(output, "true\nfalse\ntrue\nfalse\ntrue\nfalse\ntrue\n");
}

#[test]
fn logical_operators_return_operands() {
    let output = run_ok(
        "print nil or \"default\";\n\
         print 0 or \"unused\";\n\
         print false and crash();\n\
         print 1 and 2;",
    );

    assert_eq!(output, "default\n0\nfalse\n2\n");
}

#[test]
fn variable_scoping() {
    let output = run_ok(
        "var a = \"global a\";\n\
         var b = \"global b\";\n\
         var c = \"global c\";\n\
         {\n\
             var a = \"outer a\";\n\
             var b = \"outer b\";\n\
             {\n\
                 var a = \"inner a\";\n\
                 print a;\n\
                 print b;\n\
                 print c;\n\
             }\n\
             print a;\n\
             print b;\n\
             print c;\n\
         }\n\
         print a;\n\
         print b;\n\
         print c;",
    );

    assert_eq!(
        output,
        "inner a\nouter b\nglobal c\nouter a\nouter b\nglobal c\nglobal a\nglobal b\nglobal c\n"
    );
}

#[test]
fn shadowing_restores_outer_after_block() {
    let output = run_ok("var a = \"outer\"; { var a = \"inner\"; print a; } print a;");

    assert_eq!(output, "inner\nouter\n");
}

#[test]
fn control_flow() {
    let output = run_ok(
        "var i = 0;\n\
         while (i < 3) { print i; i = i + 1; }\n\
         for (var j = 0; j < 2; j = j + 1) print \"j\" ;\n\
         if (i == 3) print \"three\"; else print \"other\";\n\
         if (nil) print \"no\";",
    );

    assert_eq!(output, "0\n1\n2\nj\nj\nthree\n");
}

#[test]
fn for_loop_variable_is_scoped_to_loop() {
    let outcome = run("for (var k = 0; k < 1; k = k + 1) {} print k;");

    assert!(outcome.status.had_runtime_error);
    assert_eq!(outcome.reported.runtime_errors[0].1, "Undefined variable 'k'.");
}

#[test]
fn recursion() {
    let output = run_ok(
        "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }\n\
         print fib(15);",
    );

    assert_eq!(output, "610\n");
}

#[test]
fn closures_capture_definition_scope() {
    let output = run_ok(
        "fun makeCounter() {\n\
             var count = 0;\n\
             fun increment() { count = count + 1; return count; }\n\
             return increment;\n\
         }\n\
         var counter = makeCounter();\n\
         counter();\n\
         print counter();\n\
         var other = makeCounter();\n\
         print other();",
    );

    assert_eq!(output, "2\n1\n");
}

#[test]
fn closures_bind_statically_not_dynamically() {
    let output = run_ok(
        "var a = \"global\";\n\
         {\n\
             fun showA() { print a; }\n\
             showA();\n\
             var a = \"block\";\n\
             showA();\n\
         }",
    );

    assert_eq!(output, "global\nglobal\n");
}

#[test]
fn functions_print_as_fn() {
    let output = run_ok("fun f() {} print f; class C {} print C; print C();");

    assert_eq!(output, "<fn f>\nC\nC instance\n");
}

#[test]
fn return_without_value_is_nil() {
    let output = run_ok("fun f() { return; } print f(); fun g() {} print g();");

    assert_eq!(output, "nil\nnil\n");
}

#[test]
fn classes_fields_and_methods() {
    let output = run_ok(
        "class Point {\n\
             init(x, y) { this.x = x; this.y = y; }\n\
             sum() { return this.x + this.y; }\n\
         }\n\
         var p = Point(1, 2);\n\
         print p.sum();\n\
         p.x = 10;\n\
         print p.sum();\n\
         var m = p.sum;\n\
         print m();",
    );

    assert_eq!(output, "3\n12\n12\n");
}

#[test]
fn fields_shadow_methods() {
    let output = run_ok(
        "class A { f() { return \"method\"; } }\n\
         var a = A();\n\
         a.f = \"field\";\n\
         print a.f;\n\
         print A().f();",
    );

    assert_eq!(output, "field\nmethod\n");
}

#[test]
fn initializer_returns_instance() {
    let output = run_ok(
        "class A { init() { this.v = 1; return; } }\n\
         var a = A();\n\
         print a.init();\n\
         print a.v;",
    );

    assert_eq!(output, "A instance\n1\n");
}

#[test]
fn inherited_initializer_sets_arity() {
    let output = run_ok(
        "class A { init(n) { this.n = n; } }\n\
         class B < A {}\n\
         print B(7).n;",
    );

    assert_eq!(output, "7\n");

    let (_, message) = runtime_error("class A { init(n) {} } class B < A {} B();");
    assert_eq!(message, "Expected 1 arguments but got 0.");
}

#[test]
fn super_calls_dispatch_up_the_chain() {
    let output = run_ok(
        "class A { f() { print \"A\"; } }\n\
         class B < A { f() { print \"B\"; super.f(); } }\n\
         B().f();",
    );

    assert_eq!(output, "B\nA\n");
}

#[test]
fn super_binds_current_instance() {
    let output = run_ok(
        "class A { name() { return \"A\"; } describe() { return \"I am \" + this.name(); } }\n\
         class B < A { name() { return \"B\"; } describe() { return super.describe() + \"!\"; } }\n\
         class C < B {}\n\
         print C().describe();",
    );

    assert_eq!(output, "I am B!\n");
}

#[test]
fn type_errors() {
    let (line, message) = runtime_error("print 1 + \"a\";");
    assert_eq!(line, 1);
    assert_eq!(message, "Operands must be two numbers or two strings.");

    let (_, message) = runtime_error("print \"a\" - 1;");
    assert_eq!(message, "Operands must be numbers.");

    let (_, message) = runtime_error("print -\"a\";");
    assert_eq!(message, "Operand must be a number.");

    let (_, message) = runtime_error("print 1 < nil;");
    assert_eq!(message, "Operands must be numbers.");
}

#[test]
fn call_errors() {
    let (_, message) = runtime_error("fun f(a, b) {} f(1);");
    assert_eq!(message, "Expected 2 arguments but got 1.");

    let (_, message) = runtime_error("nil();");
    assert_eq!(message, "Can only call functions and classes, not nil.");

    let (_, message) = runtime_error("\"str\"();");
    assert_eq!(message, "Can only call functions and classes, not string.");
}

#[test]
fn property_errors() {
    let (_, message) = runtime_error("class A {} print A().missing;");
    assert_eq!(message, "Undefined property 'missing'.");

    let (_, message) = runtime_error("var x = 1; print x.y;");
    assert_eq!(message, "Only instances have properties.");

    let (_, message) = runtime_error("var x = 1; x.y = 2;");
    assert_eq!(message, "Only instances have fields.");

    let (_, message) = runtime_error("var NotAClass = 1; class B < NotAClass {}");
    assert_eq!(message, "Superclass must be a class.");
}

#[test]
fn undefined_variables() {
    let (line, message) = runtime_error("print 1;\nprint missing;");
    assert_eq!(line, 2);
    assert_eq!(message, "Undefined variable 'missing'.");

    let (_, message) = runtime_error("missing = 1;");
    assert_eq!(message, "Undefined variable 'missing'.");
}

#[test]
fn runtime_error_stops_the_batch() {
    let outcome = run("print 1; print nil + 1; print 2;");

    assert!(outcome.status.had_runtime_error);
    assert_eq!(outcome.status.exit_code(), 70);
    assert_eq!(outcome.output, "1\n");
}

#[test]
fn static_errors_prevent_execution() {
    let outcome = run("print \"never\"; var a = a;");

    assert!(outcome.status.had_error);
    assert_eq!(outcome.status.exit_code(), 65);
    assert_eq!(outcome.output, "");
    assert_eq!(
        outcome.reported.errors,
        vec!["[line 1] Error at 'a': Can't read local variable in its own initializer."]
    );

    let outcome = run("print \"never\";\nreturn 1;");
    assert_eq!(outcome.output, "");
    assert_eq!(
        outcome.reported.errors,
        vec!["[line 2] Error at 'return': Can't return from top-level code."]
    );
}

#[test]
fn syntax_errors_prevent_resolution_and_execution() {
    let outcome = run("print 1;\nprint (2;\nprint 3");

    assert!(outcome.status.had_error);
    assert_eq!(outcome.output, "");
    assert_eq!(
        outcome.reported.errors,
        vec![
            "[line 2] Error at ';': Expect ')' after expression.",
            "[line 3] Error at end: Expect ';' after value.",
        ]
    );
}

#[test]
fn lexical_errors_prevent_execution() {
    let outcome = run("print 1; @");

    assert!(outcome.status.had_error);
    assert_eq!(outcome.output, "");
    assert_eq!(
        outcome.reported.errors,
        vec!["[line 1] Error: Unexpected character: @"]
    );
}

#[test]
fn call_depth_limit_is_a_runtime_error() {
    let mut interpreter = Interpreter::new(Vec::new()).with_max_depth(16);
    let mut reported = Collected::default();

    let status = rox::run(
        "fun down(n) { return down(n + 1); } down(0);",
        &mut interpreter,
        &mut reported,
    );

    assert!(status.had_runtime_error);
    assert_eq!(reported.runtime_errors[0].1, "Stack overflow.");
    assert_eq!(interpreter.call_depth(), 0);
}

const COUNTDOWN: &str = "fun d(n) { if (n == 0) return 0; return 1 + d(n - 1); }";

#[test]
fn recursion_near_the_default_limit_completes() {
    let depth = DEFAULT_MAX_CALL_DEPTH - 4;
    let output = run_ok(&format!("{} print d({});", COUNTDOWN, depth));

    assert_eq!(output, format!("{}\n", depth));
}

#[test]
fn runaway_recursion_is_a_runtime_error_not_a_crash() {
    // The call-depth cap is far out of reach; the native stack budget trips first.
    let mut interpreter = Interpreter::new(Vec::new()).with_max_depth(1_000_000);
    let mut reported = Collected::default();

    let status = rox::run(
        &format!("{} print d(100000); print \"unreached\";", COUNTDOWN),
        &mut interpreter,
        &mut reported,
    );

    assert!(status.had_runtime_error);
    assert_eq!(reported.runtime_errors[0].1, "Stack overflow.");
    assert_eq!(interpreter.call_depth(), 0);
    assert!(interpreter.into_output().is_empty());
}

#[test]
fn deep_recursion_on_a_thread_sized_for_it() {
    const DEPTH: usize = 1000;
    const PER_CALL: usize = 64 * 1024;

    let output = thread::Builder::new()
        .stack_size(DEPTH * PER_CALL + 4 * 1024 * 1024)
        .spawn(|| {
            let mut interpreter = Interpreter::new(Vec::new())
                .with_max_depth(DEPTH)
                .with_stack_budget(DEPTH * PER_CALL);
            let mut reported = Collected::default();

            let status = rox::run(
                &format!("{} print d({});", COUNTDOWN, DEPTH - 10),
                &mut interpreter,
                &mut reported,
            );
            assert_eq!(status, RunStatus::default(), "{:?}", reported.runtime_errors);

            String::from_utf8(interpreter.into_output()).expect("UTF-8")
        })
        .expect("spawn interpreter thread")
        .join()
        .expect("interpreter thread");

    assert_eq!(output, format!("{}\n", DEPTH - 10));
}

#[test]
fn batches_share_globals_like_a_repl() {
    let mut interpreter = Interpreter::new(Vec::new());
    let mut reported = Collected::default();

    let lines = [
        "var count = 0;",
        "fun bump() { count = count + 1; return count; }",
        "bump();",
        "print nil + 1;",
        "{ var local = bump(); print local; }",
        "print count;",
    ];

    for line in lines {
        rox::run(line, &mut interpreter, &mut reported);
    }

    let output = String::from_utf8(interpreter.into_output()).expect("UTF-8");
    assert_eq!(output, "2\n2\n");
    assert_eq!(reported.runtime_errors.len(), 1);
}

#[test]
fn closures_survive_across_batches() {
    let mut interpreter = Interpreter::new(Vec::new());
    let mut reported = Collected::default();

    rox::run(
        "fun make() { var x = \"kept\"; fun get() { return x; } return get; }",
        &mut interpreter,
        &mut reported,
    );
    rox::run("var g = make();", &mut interpreter, &mut reported);
    rox::run("{ var x = \"shadow\"; print g(); }", &mut interpreter, &mut reported);

    let output = String::from_utf8(interpreter.into_output()).expect("UTF-8");
    assert_eq!(output, "kept\n");
    assert!(reported.errors.is_empty());
}

// End-to-end tests: compile C source and run it on the bytecode VM

use std::rc::Rc;

use tacc::codegen::disasm;
use tacc::runtime::{RuntimeError, Vm, VmOptions};
use tacc::{Backend, CompileError, Engine, EngineConfig, ErrorKind, SymbolAddress};

fn engine() -> Engine {
    Engine::new(
        EngineConfig::default()
            .with_backend(Backend::Bytecode)
            .with_step_limit(Some(10_000_000)),
    )
}

/// Run `main` and return its result with everything it printed.
fn run_with_output(source: &str, args: &[&str]) -> (i64, String) {
    let mut engine = engine();
    engine.compile(source).expect("compile failed");
    let argv: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    let mut vm = engine.vm(&argv).expect("vm setup failed");
    let result = vm.run().expect("execution failed");
    let output = String::from_utf8_lossy(vm.console().output()).into_owned();
    (result, output)
}

fn run(source: &str) -> i32 {
    let mut engine = engine();
    engine.compile(source).expect("compile failed");
    engine.run(&[]).expect("execution failed")
}

fn compile_error(source: &str) -> CompileError {
    engine().compile(source).expect_err("compile should fail")
}

#[test]
fn test_scenario_a_arithmetic() {
    assert_eq!(run("int main(){return 1+2*3;}"), 7);
}

#[test]
fn test_scenario_b_global_sum() {
    let source = r#"
        int sum;
        int main() {
            int i;
            i = 1;
            sum = 0;
            while (i <= 5) {
                sum = sum + i;
                i++;
            }
            return sum;
        }
    "#;
    assert_eq!(run(source), 15);
}

#[test]
fn test_scenario_c_forward_call() {
    let source = r#"
        int main() {
            return fact(5);
        }

        int fact(int n) {
            if (n <= 1)
                return 1;
            return n * fact(n - 1);
        }
    "#;
    assert_eq!(run(source), 120);
}

#[test]
fn test_scenario_c_mutual_recursion() {
    let source = r#"
        int is_even(int n) {
            if (n == 0) return 1;
            return is_odd(n - 1);
        }
        int is_odd(int n) {
            if (n == 0) return 0;
            return is_even(n - 1);
        }
        int main() { return is_even(10) * 10 + is_odd(7); }
    "#;
    assert_eq!(run(source), 11);
}

#[test]
fn test_scenario_d_dump_is_deterministic() {
    let dump = |source: &str| {
        let mut engine = engine();
        engine.compile(source).unwrap();
        let mut bytes = Vec::new();
        engine.dump(&mut bytes).unwrap();
        bytes
    };

    let first = dump("int main(){return 1+2*3;}");
    assert!(!first.is_empty());
    assert_eq!(first, dump("int main(){return 1+2*3;}"));

    let minimal = dump("int main(){return 0;}");
    assert_eq!(minimal, dump("int main(){return 0;}"));
    assert!(minimal.len() < first.len());
    assert!(minimal.len() <= 32);
}

#[test]
fn test_dumped_bytes_run_the_same() {
    let source = "int g; int main() { g = 6; return g * 7; }";
    let mut engine = engine();
    engine.compile(source).unwrap();
    let mut bytes = Vec::new();
    engine.dump(&mut bytes).unwrap();

    let program = engine.program().unwrap();
    let entry = program.main_entry().unwrap();
    let options = VmOptions {
        stack_size: 64 * 1024,
        step_limit: None,
        echo: false,
    };
    let mut vm = Vm::new(Rc::from(bytes), program.data(), entry, &[], options).unwrap();
    assert_eq!(vm.run().unwrap(), i64::from(engine.run(&[]).unwrap()));
}

#[test]
fn test_forward_call_lands_on_entry() {
    let mut engine = engine();
    let program = engine
        .compile("int main() { return g(); } int g() { return 5; }")
        .unwrap();
    let Some(SymbolAddress::Function(g)) = program.symbol_address("g") else {
        panic!("g is not a function");
    };
    let calls: Vec<_> = disasm::disassemble(program.code())
        .into_iter()
        .filter(|i| i.mnemonic == "call")
        .collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].operands, format!("{g:#06x}"));
}

#[test]
fn test_short_circuit_skips_right_operand() {
    let source = r#"
        int hits;
        int touch(int v) { hits = hits + 1; return v; }
        int main() {
            hits = 0;
            if (touch(0) && touch(1)) return 100;
            if (touch(1) || touch(1)) hits = hits + 10;
            return hits;
        }
    "#;
    // one call per short-circuited condition, plus the branch taken
    assert_eq!(run(source), 12);
}

#[test]
fn test_logical_results_are_boolean() {
    assert_eq!(run("int main() { return (5 && 7) + (0 || 9) * 10 + (0 && 1) * 100; }"), 11);
}

#[test]
fn test_macro_matches_literal() {
    let with_macro = run("#define N 5\nint main() { return N * N + N; }");
    let literal = run("int main() { return 5 * 5 + 5; }");
    assert_eq!(with_macro, literal);
}

#[test]
fn test_macro_is_token_substitution() {
    // N expands to `2 + 3`, not `(2 + 3)`
    assert_eq!(run("#define N 2 + 3\nint main() { return N * 2; }"), 8);
}

#[test]
fn test_precedence() {
    assert_eq!(run("int main() { return 2 + 3 * 4 - 10 / 5; }"), 12);
    assert_eq!(run("int main() { return 1 << 2 + 1; }"), 8);
    assert_eq!(run("int main() { return 6 & 3 | 8 ^ 1; }"), 11);
    assert_eq!(run("int main() { return 1 < 2 == 1; }"), 1);
    assert_eq!(run("int main() { return -7 % 3; }"), -1);
}

#[test]
fn test_for_loop_with_break() {
    let source = r#"
        int main() {
            int i;
            int total;
            total = 0;
            for (i = 0; i < 100; i++) {
                if (i == 10) break;
                total = total + i;
            }
            return total;
        }
    "#;
    assert_eq!(run(source), 45);
}

#[test]
fn test_pointers_and_bytes() {
    let source = r#"
        int main() {
            char *s;
            int n;
            s = "hello";
            n = 0;
            while (*(char *)(s + n)) n++;
            return n * 100 + *(char *)(s + 1);
        }
    "#;
    assert_eq!(run(source), 500 + i32::from(b'e'));
}

#[test]
fn test_store_through_pointer() {
    let source = r#"
        int x;
        int main() {
            int *p;
            p = &x;
            *(int *)p = 41;
            *(int *)p = *(int *)p + 1;
            return x;
        }
    "#;
    assert_eq!(run(source), 42);
}

#[test]
fn test_function_pointer_call() {
    let source = r#"
        int twice(int v) { return v * 2; }
        int main() {
            int f;
            f = twice;
            return (*(int (*)())f)(21);
        }
    "#;
    assert_eq!(run(source), 42);
}

#[test]
fn test_argc_and_argv() {
    let source = r#"
        int main(int argc, char **argv) {
            printf("%s\n", *(int *)(argv + 8));
            return argc;
        }
    "#;
    let (result, output) = run_with_output(source, &["prog", "first", "second"]);
    assert_eq!(result, 3);
    assert_eq!(output, "first\n");
}

#[test]
fn test_printf_output() {
    let source = r#"
        int main() {
            int i;
            for (i = 1; i <= 3; i++)
                printf("%d:%c ", i, 'a' + i - 1);
            puts("done");
            return 0;
        }
    "#;
    let (_, output) = run_with_output(source, &[]);
    assert_eq!(output, "1:a 2:b 3:c done\n");
}

#[test]
fn test_main_result_truncated_to_int() {
    assert_eq!(run("int main() { return 4294967296 + 3; }"), 3);
}

#[test]
fn test_locals_share_the_global_name() {
    // a local declaration rebinds the name for the rest of the file
    let source = r#"
        int x;
        int f() { int x; x = 5; return x; }
        int main() { x = 1; return f(); }
    "#;
    assert_eq!(run(source), 5);
}

#[test]
fn test_unresolved_function() {
    let err = compile_error("int main() {\n  return missing_fn(1);\n}");
    assert_eq!(err.kind, ErrorKind::UnresolvedSymbol);
    assert!(err.message.contains("missing_fn"));
    let location = err.location.expect("location");
    assert_eq!(location.line, 2);
}

#[test]
fn test_syntax_error_location() {
    let err = compile_error("int main() {\n  return 1\n}");
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert_eq!(err.location.map(|l| l.line), Some(3));
}

#[test]
fn test_undefined_variable() {
    let err = compile_error("int main() { return y + 1; }");
    assert_eq!(err.kind, ErrorKind::UnresolvedSymbol);
    assert!(err.message.contains("'y'"));
    assert_eq!(err.location.map(|l| l.column), Some(21));
}

#[test]
fn test_code_capacity_exceeded() {
    let mut engine = Engine::new(
        EngineConfig::default()
            .with_backend(Backend::Bytecode)
            .with_code_capacity(1),
    );
    let mut body = String::from("int main() { int x; x = 0;");
    for _ in 0..1000 {
        body.push_str(" x = x + 1;");
    }
    body.push_str(" return x; }");
    let err = engine.compile(&body).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::CapacityExceeded(_)));
}

#[test]
fn test_division_by_zero_faults() {
    let mut engine = engine();
    engine.compile("int main() { int z; z = 0; return 1 / z; }").unwrap();
    assert!(matches!(engine.run(&[]), Err(RuntimeError::Fault { .. })));
}

#[test]
fn test_runaway_recursion_overflows() {
    let mut engine = Engine::new(
        EngineConfig::default()
            .with_backend(Backend::Bytecode)
            .with_stack_size(4096),
    );
    engine.compile("int f(int n) { return f(n + 1); } int main() { return f(0); }").unwrap();
    assert!(matches!(engine.run(&[]), Err(RuntimeError::StackOverflow { .. })));
}

#[test]
fn test_step_limit() {
    let mut engine = Engine::new(
        EngineConfig::default()
            .with_backend(Backend::Bytecode)
            .with_step_limit(Some(1000)),
    );
    engine.compile("int main() { while (1) ; return 0; }").unwrap();
    assert!(matches!(engine.run(&[]), Err(RuntimeError::StepLimit(1000))));
}

#[test]
fn test_recompile_replaces_program() {
    let mut engine = engine();
    engine.compile("int main() { return 1; }").unwrap();
    assert_eq!(engine.run(&[]).unwrap(), 1);
    engine.compile("int main() { return 2; }").unwrap();
    assert_eq!(engine.run(&[]).unwrap(), 2);
}

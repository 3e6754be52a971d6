// Native x86-64 execution, checked against the bytecode VM
#![cfg(all(target_arch = "x86_64", unix))]

use tacc::{Backend, Engine, EngineConfig};

fn run(backend: Backend, source: &str, args: &[&str]) -> i32 {
    let mut engine = Engine::new(EngineConfig::default().with_backend(backend));
    engine.compile(source).expect("compile failed");
    let argv: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    engine.run(&argv).expect("execution failed")
}

fn assert_agree(source: &str, expected: i32) {
    assert_eq!(run(Backend::Native, source, &["prog"]), expected, "native");
    assert_eq!(run(Backend::Bytecode, source, &["prog"]), expected, "bytecode");
}

#[test]
fn test_scenarios_natively() {
    assert_agree("int main(){return 1+2*3;}", 7);
    assert_agree(
        "int sum; int main() { int i; i = 1; sum = 0; while (i <= 5) { sum = sum + i; i++; } return sum; }",
        15,
    );
    assert_agree(
        "int main() { return fact(6); } int fact(int n) { if (n <= 1) return 1; return n * fact(n - 1); }",
        720,
    );
}

#[test]
fn test_many_arguments() {
    // more arguments than argument registers
    let source = r#"
        int f(int a, int b, int c, int d, int e, int g, int h, int i) {
            return a + 2 * b + 3 * c + 4 * d + 5 * e + 6 * g + 7 * h + 8 * i;
        }
        int main() { return f(1, 2, 3, 4, 5, 6, 7, 8); }
    "#;
    assert_agree(source, 204);
}

#[test]
fn test_odd_pushes_keep_calls_aligned() {
    // host calls made with an odd number of temporaries on the stack
    let source = r#"
        int main() {
            int n;
            n = 1 + strlen("abc") * (2 + strlen("hello"));
            return n;
        }
    "#;
    assert_agree(source, 22);
}

#[test]
fn test_globals_and_pointers_natively() {
    let source = r#"
        int counter;
        int bump(int *p) { *(int *)p = *(int *)p + 1; return *(int *)p; }
        int main() {
            counter = 40;
            bump(&counter);
            return bump(&counter);
        }
    "#;
    assert_agree(source, 42);
}

#[test]
fn test_strings_and_host_calls() {
    let source = r#"
        int main() {
            char *s;
            s = "  -17";
            return atoi(s) + abs(-20) + *(char *)"A";
        }
    "#;
    assert_agree(source, -17 + 20 + 65);
}

#[test]
fn test_host_data_objects() {
    // `stdout` is a data symbol of the C library, found by name
    let source = r#"
        int main() {
            int out;
            out = stdout;
            fflush(stdout);
            return (out != 0) + (&stdout != 0) * 2 + (stdout == out) * 4;
        }
    "#;
    assert_eq!(run(Backend::Native, source, &["prog"]), 7);
}

#[test]
fn test_host_data_only_on_native() {
    let mut engine = Engine::new(EngineConfig::default().with_backend(Backend::Bytecode));
    let err = engine.compile("int main() { return stdout; }").unwrap_err();
    assert_eq!(err.kind, tacc::ErrorKind::UnresolvedSymbol);
}

#[test]
fn test_argc_natively() {
    let source = "int main(int argc, char **argv) { return argc * 10 + strlen(*(int *)argv); }";
    assert_eq!(run(Backend::Native, source, &["abc", "x"]), 23);
    assert_eq!(run(Backend::Bytecode, source, &["abc", "x"]), 23);
}

#[test]
fn test_native_dump_is_deterministic() {
    let dump = || {
        let mut engine = Engine::new(EngineConfig::default().with_backend(Backend::Native));
        engine.compile("int main(){return 0;}").unwrap();
        let mut bytes = Vec::new();
        engine.dump(&mut bytes).unwrap();
        bytes
    };
    let first = dump();
    assert!(!first.is_empty() && first.len() <= 32);
    assert_eq!(first, dump());
}

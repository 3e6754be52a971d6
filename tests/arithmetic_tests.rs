// Property tests: compiled expressions against a reference evaluator

use proptest::prelude::*;

use tacc::{Backend, Engine, EngineConfig};

#[derive(Debug, Clone)]
enum Expr {
    Lit(i64),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Bin(&'static str, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn source(&self) -> String {
        match self {
            Expr::Lit(v) => v.to_string(),
            Expr::Neg(e) => format!("-({})", e.source()),
            Expr::Not(e) => format!("!({})", e.source()),
            Expr::Bin(op, l, r) => format!("({} {} {})", l.source(), op, r.source()),
        }
    }

    fn eval(&self) -> i64 {
        match self {
            Expr::Lit(v) => *v,
            Expr::Neg(e) => e.eval().wrapping_neg(),
            Expr::Not(e) => i64::from(e.eval() == 0),
            Expr::Bin(op, l, r) => {
                let (a, b) = (l.eval(), r.eval());
                match *op {
                    "+" => a.wrapping_add(b),
                    "-" => a.wrapping_sub(b),
                    "*" => a.wrapping_mul(b),
                    "&" => a & b,
                    "|" => a | b,
                    "^" => a ^ b,
                    "<" => i64::from(a < b),
                    "<=" => i64::from(a <= b),
                    ">" => i64::from(a > b),
                    ">=" => i64::from(a >= b),
                    "==" => i64::from(a == b),
                    "!=" => i64::from(a != b),
                    "&&" => i64::from(a != 0 && b != 0),
                    "||" => i64::from(a != 0 || b != 0),
                    other => unreachable!("operator {other}"),
                }
            }
        }
    }
}

fn expr() -> impl Strategy<Value = Expr> {
    let leaf = (0i64..1000).prop_map(Expr::Lit);
    leaf.prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(|e| Expr::Neg(Box::new(e))),
            inner.clone().prop_map(|e| Expr::Not(Box::new(e))),
            (
                prop::sample::select(vec![
                    "+", "-", "*", "&", "|", "^", "<", "<=", ">", ">=", "==", "!=", "&&", "||",
                ]),
                inner.clone(),
                inner,
            )
                .prop_map(|(op, l, r)| Expr::Bin(op, Box::new(l), Box::new(r))),
        ]
    })
}

fn run(backend: Backend, source: &str) -> i32 {
    let mut engine = Engine::new(EngineConfig::default().with_backend(backend));
    engine.compile(source).expect("compile failed");
    engine.run(&[]).expect("execution failed")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_expressions_match_reference(e in expr()) {
        let source = format!("int main() {{ return {}; }}", e.source());
        prop_assert_eq!(run(Backend::Bytecode, &source), e.eval() as i32);
    }

    #[test]
    fn test_short_circuit_law(a in -3i64..3, b in -3i64..3) {
        // g counts evaluations of the right operand
        let source = format!(
            "int g; int right(int v) {{ g = g + 1; return v; }}
             int main() {{ int r; g = 0; r = ({a}) && right({b}); r = r * 4 + (({a}) || right({b})) * 2; return r * 8 + g; }}"
        );
        let and = i64::from(a != 0 && b != 0);
        let or = i64::from(a != 0 || b != 0);
        // exactly one of the two right operands runs
        let expected = ((and * 4 + or * 2) * 8) + 1;
        prop_assert_eq!(i64::from(run(Backend::Bytecode, &source)), expected);
    }

    #[test]
    fn test_locals_and_loops(n in 0i64..40, step in 1i64..5) {
        let source = format!(
            "int main() {{ int i; int t; t = 0; for (i = 0; i < {n}; i = i + {step}) t = t + i; return t; }}"
        );
        let expected: i64 = (0..n).step_by(step as usize).sum();
        prop_assert_eq!(i64::from(run(Backend::Bytecode, &source)), expected);
    }
}

#[cfg(all(target_arch = "x86_64", unix))]
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_backends_agree_on_expressions(e in expr()) {
        let source = format!("int main() {{ return {}; }}", e.source());
        prop_assert_eq!(run(Backend::Native, &source), run(Backend::Bytecode, &source));
    }
}

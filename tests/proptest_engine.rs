//! Property-based tests for integer semantics, constant deduplication and
//! the binary bytecode form.

mod common;

use cinder::ast::{Expr, File, Stmt, Token};
use cinder::compiler::Compiler;
use cinder::source::SourceFileSet;
use cinder::{Bytecode, Object};
use common::*;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_int() -> impl Strategy<Value = i64> {
    any::<i64>()
}

fn arb_nonzero() -> impl Strategy<Value = i64> {
    prop_oneof![1i64..=i64::MAX, i64::MIN..=-1i64]
}

fn arb_literal() -> impl Strategy<Value = Expr> {
    prop_oneof![
        (-5i64..5).prop_map(Expr::int),
        prop::sample::select(vec!["a", "b", "c"]).prop_map(|s| Expr::str(s)),
        any::<bool>().prop_map(Expr::bool),
        (-2i64..2).prop_map(|v| Expr::float(v as f64 / 2.0)),
    ]
}

/// Short programs full of repeated literals, some inside functions.
fn arb_program() -> impl Strategy<Value = Vec<Stmt>> {
    let stmt = prop_oneof![
        arb_literal().prop_map(Stmt::expr),
        prop::collection::vec(arb_literal(), 0..4).prop_map(|items| Stmt::expr(Expr::array(items))),
        prop::collection::vec(arb_literal(), 0..3)
            .prop_map(|items| Stmt::expr(Expr::func(&[], items.into_iter().map(Stmt::expr).collect()))),
    ];
    prop::collection::vec(stmt, 0..8)
}

fn compile(stmts: Vec<Stmt>) -> Bytecode {
    let mut compiler = Compiler::new(SourceFileSet::new());
    compiler
        .compile(&File::new(stmts))
        .unwrap_or_else(|e| panic!("compile failed: {}", e))
}

fn eval_binary(a: i64, op: Token, b: i64) -> Object {
    eval_out(vec![out(bin(int(a), op, int(b)))])
}

// =============================================================================
// Integer semantics
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// `+ - *` wrap on overflow.
    #[test]
    fn int_arithmetic_wraps(a in arb_int(), b in arb_int()) {
        prop_assert_eq!(eval_binary(a, Token::Add, b), Object::Int(a.wrapping_add(b)));
        prop_assert_eq!(eval_binary(a, Token::Sub, b), Object::Int(a.wrapping_sub(b)));
        prop_assert_eq!(eval_binary(a, Token::Mul, b), Object::Int(a.wrapping_mul(b)));
    }

    /// Division truncates toward zero and the remainder takes the sign of
    /// the dividend.
    #[test]
    fn int_division_truncates(a in arb_int(), b in arb_nonzero()) {
        let q = eval_binary(a, Token::Quo, b);
        let r = eval_binary(a, Token::Rem, b);
        prop_assert_eq!(&q, &Object::Int(a.wrapping_div(b)));
        prop_assert_eq!(&r, &Object::Int(a.wrapping_rem(b)));
        if let (Object::Int(q), Object::Int(r)) = (q, r) {
            prop_assert_eq!(q.wrapping_mul(b).wrapping_add(r), a);
            prop_assert!(r == 0 || (r < 0) == (a < 0));
        }
    }

    /// `<` and `<=` are compiled as swapped `>` and `>=` and must agree with
    /// the direct forms.
    #[test]
    fn comparisons_are_consistent(a in -100i64..100, b in -100i64..100) {
        prop_assert_eq!(eval_binary(a, Token::Less, b), Object::Bool(a < b));
        prop_assert_eq!(eval_binary(a, Token::LessEq, b), Object::Bool(a <= b));
        prop_assert_eq!(eval_binary(a, Token::Greater, b), Object::Bool(a > b));
        prop_assert_eq!(eval_binary(a, Token::GreaterEq, b), Object::Bool(a >= b));
    }
}

// =============================================================================
// Constant pool
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A second deduplication pass changes nothing.
    #[test]
    fn dedup_is_idempotent(stmts in arb_program()) {
        let mut once = compile(stmts);
        once.remove_duplicates();
        let mut twice = once.clone();
        twice.remove_duplicates();
        prop_assert_eq!(&once, &twice);
    }

    /// After deduplication no two scalar constants are equal.
    #[test]
    fn dedup_leaves_unique_scalars(stmts in arb_program()) {
        let mut bc = compile(stmts);
        bc.remove_duplicates();
        let scalars: Vec<&Object> = bc
            .constants
            .iter()
            .filter(|c| matches!(c, Object::Int(_) | Object::String(_) | Object::Float(_)))
            .collect();
        for (i, a) in scalars.iter().enumerate() {
            for b in &scalars[i + 1..] {
                prop_assert!(!a.equals(b), "duplicate constant {}", a);
            }
        }
    }

    /// Encoding then decoding yields a structurally equal program.
    #[test]
    fn encode_decode_preserves_program(stmts in arb_program()) {
        let mut bc = compile(stmts);
        bc.remove_duplicates();
        let bytes = bc.encode().expect("encode");
        let decoded = Bytecode::decode(&bytes).expect("decode");
        prop_assert_eq!(&decoded, &bc);
    }
}

//! Building loop bodies and interpreting them with a custom handler

use loopidx_ir::prelude::*;
use proptest::prelude::*;
use std::collections::HashMap;

/// Counts opcodes instead of computing anything
#[derive(Default)]
struct OpCounter {
    seen: Vec<String>,
}

impl OpsHandler for OpCounter {
    type Value = usize;

    fn dispatch(&mut self, opcode: &Opcode, args: &[Operand<'_, usize>]) -> Result<Option<usize>> {
        self.seen.push(opcode.to_string());
        let depth = args
            .iter()
            .filter_map(|a| match a {
                Operand::Value(d) => Some(*d),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        Ok((*opcode != Opcode::Store).then_some(depth + 1))
    }
}

struct DepthHooks;

impl SubmoduleHooks<usize> for DepthHooks {
    fn get_index(&mut self, _name: &str) -> Result<usize> {
        Ok(0)
    }

    fn set_indirect(&mut self, _slot: usize, value: usize) -> Result<usize> {
        Ok(value)
    }

    fn masked_subblock(&mut self, _slot: usize, _args: &[Operand<'_, usize>], inner: usize) -> Result<usize> {
        Ok(inner + 100)
    }
}

#[test]
fn test_masked_subblock_hook_post_processes_output() {
    let x0 = Symbol::new("x0");
    let mut body = LoopBody::new([(x0.clone(), 32)]);
    body.add_indexing_expr("index0", Expr::from(x0));

    let mut sub = body.block_mut("masked_subblock0");
    let idx = sub.get_index("index0").unwrap();
    let e = sub.index_expr(idx, Dtype::Int64).unwrap();
    let n = sub.unary(UnaryOp::Neg, e).unwrap();
    sub.output(n).unwrap();

    let mut root = body.block_mut(ROOT_BLOCK);
    let idx = root.get_index("index0").unwrap();
    let e = root.index_expr(idx, Dtype::Int64).unwrap();
    let zero = root.constant(0i64, Dtype::Int64).unwrap();
    let mask = root.compare(BoolOp::Gt, e, zero).unwrap();
    let masked = root.masked_subblock(0, mask, 0i64).unwrap();
    let out = root.store("out_ptr0", idx, masked).unwrap();

    let mut env = Env::new();
    let mut counter = OpCounter::default();
    Interpreter::new(&body).run(&mut env, &mut counter, &mut DepthHooks).unwrap();

    assert_eq!(env.get(masked), Some(&102));
    assert!(!env.contains(out));
    assert_eq!(
        counter.seen,
        vec!["index_expr", "constant", "gt", "index_expr", "neg", "store"]
    );
}

#[test]
fn test_subblock_without_output_is_malformed() {
    let mut body = LoopBody::new([(Symbol::new("x0"), 4)]);
    body.block_mut("masked_subblock0").constant(1i64, Dtype::Int64).unwrap();
    let mut root = body.block_mut(ROOT_BLOCK);
    let c = root.constant(true, Dtype::Bool).unwrap();
    root.masked_subblock(0, c, 0i64).unwrap();

    let err = Interpreter::new(&body)
        .run(&mut Env::new(), &mut OpCounter::default(), &mut DepthHooks)
        .unwrap_err();
    assert!(matches!(err, IrError::MalformedOutput { count: 0, .. }));
    assert_eq!(
        err.to_string(),
        "block 'masked_subblock0' must have exactly one output node, found 0"
    );
}

fn linear_expr() -> impl Strategy<Value = (i64, i64, i64)> {
    (-20i64..20, -20i64..20, -100i64..100)
}

proptest! {
    #[test]
    fn prop_subs_then_evaluate_matches_lookup(
        (a, b, c) in linear_expr(),
        vx in 0i64..1000,
        vy in 0i64..1000,
    ) {
        let (x, y) = (Symbol::new("x"), Symbol::new("y"));
        let expr = Expr::from(x.clone()) * Expr::int(a)
            + Expr::floor_div(Expr::from(y.clone()), Expr::int(4)) * Expr::int(b)
            + Expr::int(c);

        let direct = expr.evaluate(&|s: &Symbol| {
            Some(Scalar::Int(if *s == x { vx } else { vy }))
        });
        let substituted = expr.subs(&HashMap::from([
            (x.clone(), Expr::int(vx)),
            (y.clone(), Expr::int(vy)),
        ]));
        prop_assert!(substituted.is_constant());
        prop_assert_eq!(substituted.as_int().map(Scalar::Int), direct);
        prop_assert_eq!(direct, Some(Scalar::Int(a * vx + (vy / 4) * b + c)));
    }
}

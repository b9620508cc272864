//! Graph interpreter driver
//!
//! Walks a block in order, resolving node arguments from an environment and
//! handing each node to a pluggable [`OpsHandler`]. The three submodule
//! opcode families (`get_index`, `set_indirect<i>`, `masked_subblock<i>`) go
//! through [`SubmoduleHooks`] instead, so the same driver serves range
//! analysis or any other interpretation of the loop body.
//!
//! All interpreter state is passed in explicitly: the environment is shared
//! by the root block and every sub-block it invokes, and nodes that already
//! have a value in it are skipped. Callers use that to pre-seed values.

use crate::error::{IrError, Result};
use crate::graph::{masked_subblock_name, Arg, Block, Dtype, LoopBody, Node, NodeId, Opcode};
use crate::scalar::Scalar;
use std::collections::HashMap;
use tracing::trace;

/// Node values computed so far
#[derive(Debug, Clone)]
pub struct Env<V> {
    values: HashMap<NodeId, V>,
}

impl<V> Env<V> {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&V> {
        self.values.get(&id)
    }

    pub fn insert(&mut self, id: NodeId, value: V) {
        self.values.insert(id, value);
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<V> Default for Env<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A resolved node argument as seen by a handler
#[derive(Debug, Clone, PartialEq)]
pub enum Operand<'a, V> {
    Value(V),
    Scalar(Scalar),
    Dtype(Dtype),
    Name(&'a str),
}

/// Interpretation of ordinary opcodes
pub trait OpsHandler {
    type Value: Clone;

    /// Evaluate one node. `Ok(None)` means the opcode produces no value (e.g. `store`).
    fn dispatch(&mut self, opcode: &Opcode, args: &[Operand<'_, Self::Value>]) -> Result<Option<Self::Value>>;
}

/// Interpretation of submodule opcodes
pub trait SubmoduleHooks<V> {
    /// Resolve the named index expression
    fn get_index(&mut self, name: &str) -> Result<V>;

    /// Bind indirect variable `slot` to `value`; the returned value becomes the node's result
    fn set_indirect(&mut self, slot: usize, value: V) -> Result<V>;

    /// Combine the sub-block's output with the invocation arguments (mask, other)
    fn masked_subblock(&mut self, _slot: usize, _args: &[Operand<'_, V>], inner: V) -> Result<V> {
        Ok(inner)
    }
}

/// Driver over one loop body
pub struct Interpreter<'g> {
    body: &'g LoopBody,
}

impl<'g> Interpreter<'g> {
    pub fn new(body: &'g LoopBody) -> Self {
        Self { body }
    }

    /// Run the root block; returns the root output value, if any
    pub fn run<H, S>(&self, env: &mut Env<H::Value>, handler: &mut H, hooks: &mut S) -> Result<Option<H::Value>>
    where
        H: OpsHandler,
        S: SubmoduleHooks<H::Value>,
    {
        self.run_block(self.body.root(), env, handler, hooks)
    }

    /// Run one block against `env`; returns the value recorded for its output node
    pub fn run_block<H, S>(
        &self,
        block: &Block,
        env: &mut Env<H::Value>,
        handler: &mut H,
        hooks: &mut S,
    ) -> Result<Option<H::Value>>
    where
        H: OpsHandler,
        S: SubmoduleHooks<H::Value>,
    {
        let mut output = None;
        for &id in block.nodes() {
            let node = self.body.node(id)?;
            if node.opcode == Opcode::Output {
                output = Some(id);
            }
            if env.contains(id) {
                trace!(node = %id, opcode = %node.opcode, "pre-seeded, skipping");
                continue;
            }
            if let Some(value) = self.eval_node(node, env, handler, hooks)? {
                env.insert(id, value);
            }
            trace!(node = %id, opcode = %node.opcode, block = %block.name, "evaluated");
        }
        Ok(output.and_then(|id| env.get(id).cloned()))
    }

    fn eval_node<H, S>(
        &self,
        node: &'g Node,
        env: &mut Env<H::Value>,
        handler: &mut H,
        hooks: &mut S,
    ) -> Result<Option<H::Value>>
    where
        H: OpsHandler,
        S: SubmoduleHooks<H::Value>,
    {
        match &node.opcode {
            Opcode::Output => Ok(node
                .args
                .first()
                .and_then(Arg::as_node)
                .and_then(|arg| env.get(arg).cloned())),
            Opcode::GetIndex => match node.args.first() {
                Some(Arg::Name(name)) => hooks.get_index(name).map(Some),
                _ => Err(invalid(node, 0, "an index name")),
            },
            Opcode::SetIndirect(slot) => {
                let value = match resolve_operands(node, env)?.into_iter().next() {
                    Some(Operand::Value(v)) => v,
                    _ => return Err(invalid(node, 0, "a node value")),
                };
                hooks.set_indirect(*slot, value).map(Some)
            }
            Opcode::MaskedSubblock(slot) => {
                let sub = self.body.subblock(&masked_subblock_name(*slot))?;
                self.run_block(sub, env, handler, hooks)?;
                let out = self.body.output_node(sub)?;
                let inner = env.get(out).cloned().ok_or(IrError::MissingValue {
                    user: node.id,
                    arg: out,
                })?;
                let operands = resolve_operands(node, env)?;
                hooks.masked_subblock(*slot, &operands, inner).map(Some)
            }
            opcode => {
                let operands = resolve_operands(node, env)?;
                handler.dispatch(opcode, &operands)
            }
        }
    }
}

fn resolve_operands<'n, V: Clone>(node: &'n Node, env: &Env<V>) -> Result<Vec<Operand<'n, V>>> {
    node.args
        .iter()
        .map(|arg| match arg {
            Arg::Node(id) => env.get(*id).cloned().map(Operand::Value).ok_or(IrError::MissingValue {
                user: node.id,
                arg: *id,
            }),
            Arg::Scalar(s) => Ok(Operand::Scalar(*s)),
            Arg::Dtype(d) => Ok(Operand::Dtype(*d)),
            Arg::Name(n) => Ok(Operand::Name(n.as_str())),
        })
        .collect()
}

fn invalid(node: &Node, position: usize, expected: &'static str) -> IrError {
    IrError::InvalidOperand {
        opcode: node.opcode.to_string(),
        position,
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BinaryOp, ROOT_BLOCK};
    use crate::symbolic::Symbol;

    /// Concrete evaluator: integers only, stores recorded
    #[derive(Default)]
    struct Concrete {
        stored: Vec<i64>,
    }

    impl OpsHandler for Concrete {
        type Value = i64;

        fn dispatch(&mut self, opcode: &Opcode, args: &[Operand<'_, i64>]) -> Result<Option<i64>> {
            let value = |i: usize| match &args[i] {
                Operand::Value(v) => *v,
                Operand::Scalar(Scalar::Int(v)) => *v,
                _ => 0,
            };
            Ok(match opcode {
                Opcode::IndexExpr | Opcode::ToDtype => Some(value(0)),
                Opcode::Constant => Some(value(0)),
                Opcode::Load => Some(100),
                Opcode::Binary(BinaryOp::Add) => Some(value(0) + value(1)),
                Opcode::Binary(BinaryOp::Mul) => Some(value(0) * value(1)),
                Opcode::Store => {
                    self.stored.push(value(2));
                    None
                }
                _ => None,
            })
        }
    }

    #[derive(Default)]
    struct Hooks {
        bound: Vec<(usize, i64)>,
    }

    impl SubmoduleHooks<i64> for Hooks {
        fn get_index(&mut self, name: &str) -> Result<i64> {
            match name {
                "index0" => Ok(3),
                other => Err(IrError::UnknownIndexExpr(other.to_string())),
            }
        }

        fn set_indirect(&mut self, slot: usize, value: i64) -> Result<i64> {
            self.bound.push((slot, value));
            Ok(value)
        }
    }

    fn sample_body() -> (LoopBody, NodeId) {
        let mut body = LoopBody::new([(Symbol::new("x0"), 8)]);
        body.add_indirect_var();
        let mut sub = body.block_mut("masked_subblock1");
        let idx = sub.get_index("index0").unwrap();
        let ld = sub.load("in_ptr0", idx).unwrap();
        sub.output(ld).unwrap();

        let mut root = body.block_mut(ROOT_BLOCK);
        let idx = root.get_index("index0").unwrap();
        let e = root.index_expr(idx, Dtype::Int64).unwrap();
        let four = root.constant(4i64, Dtype::Int64).unwrap();
        let m = root.binary(BinaryOp::Mul, e, four).unwrap();
        let ind = root.set_indirect(0, m).unwrap();
        let masked = root.masked_subblock(1, e, 0i64).unwrap();
        let sum = root.binary(BinaryOp::Add, ind, masked).unwrap();
        root.store("out_ptr0", idx, sum).unwrap();
        (body, sum)
    }

    #[test]
    fn test_run_threads_env_through_subblocks() {
        let (body, sum) = sample_body();
        let mut env = Env::new();
        let mut handler = Concrete::default();
        let mut hooks = Hooks::default();
        Interpreter::new(&body).run(&mut env, &mut handler, &mut hooks).unwrap();

        assert_eq!(hooks.bound, vec![(0, 12)]);
        assert_eq!(env.get(sum), Some(&112));
        assert_eq!(handler.stored, vec![112]);
    }

    #[test]
    fn test_preseeded_nodes_are_skipped() {
        let (body, sum) = sample_body();
        let mut env = Env::new();
        env.insert(sum, -1);
        Interpreter::new(&body)
            .run(&mut env, &mut Concrete::default(), &mut Hooks::default())
            .unwrap();
        assert_eq!(env.get(sum), Some(&-1));
    }

    #[test]
    fn test_missing_subblock_is_an_error() {
        let mut body = LoopBody::new([(Symbol::new("x0"), 8)]);
        let mut root = body.block_mut(ROOT_BLOCK);
        let c = root.constant(1i64, Dtype::Bool).unwrap();
        root.masked_subblock(7, c, 0i64).unwrap();
        let err = Interpreter::new(&body)
            .run(&mut Env::new(), &mut Concrete::default(), &mut Hooks::default())
            .unwrap_err();
        assert!(matches!(err, IrError::UnknownSubblock(name) if name == "masked_subblock7"));
    }

    #[test]
    fn test_hook_errors_propagate() {
        let mut body = LoopBody::new([(Symbol::new("x0"), 8)]);
        body.block_mut(ROOT_BLOCK).get_index("index9").unwrap();
        let err = Interpreter::new(&body)
            .run(&mut Env::new(), &mut Concrete::default(), &mut Hooks::default())
            .unwrap_err();
        assert!(matches!(err, IrError::UnknownIndexExpr(_)));
    }
}

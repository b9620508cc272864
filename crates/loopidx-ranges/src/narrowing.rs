//! int64 → int32 narrowing driven by value ranges
//!
//! Runs in three phases:
//! 1. **Seed** - bind loop variables to `[0, extent - 1]`, precompute which
//!    index expressions depend on indirect variables, and pre-seed every value
//!    derived from tensor data (`load`, `reduction`, masked sub-blocks) with
//!    the unbounded range.
//! 2. **Interpret** - run the loop body through `ValueRangeAnalysis`, with
//!    `get_index`/`set_indirect` routed to the index bound solver.
//! 3. **Decide** - for each `to_dtype(_, int64)` outside the tensor-derived
//!    set, walk everything it dominates and narrow only if every dominated
//!    value fits in 32 bits.
//!
//! Candidates are decided independently of one another.

use crate::config::NarrowingConfig;
use crate::error::{RangeError, Result};
use crate::lattice::ValueRange;
use crate::report::{CandidateReport, KeepReason, NarrowingDecision, NarrowingOutcome, NarrowingReport};
use crate::semantics::ValueRangeAnalysis;
use crate::solver::IndexBoundSolver;
use anyhow::Context;
use indexmap::{IndexMap, IndexSet};
use loopidx_ir::interp::{Env, Interpreter, SubmoduleHooks};
use loopidx_ir::{Dtype, Expr, LoopBody, Node, NodeId, Opcode, Scalar, Symbol};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Largest float magnitude that float32 represents exactly (2^24)
pub const FLOAT32_EXACT_LIMIT: f64 = 16_777_216.0;

/// Whether a value survives a round trip through a 32-bit type
pub fn val_expressible_in_32_bits(v: Scalar) -> bool {
    value_fits(v, FLOAT32_EXACT_LIMIT)
}

/// Both bounds are 32-bit expressible
pub fn range_expressible_in_32_bits(range: &ValueRange) -> bool {
    range_fits(range, FLOAT32_EXACT_LIMIT)
}

fn value_fits(v: Scalar, float_limit: f64) -> bool {
    match v {
        Scalar::Bool(_) => true,
        Scalar::Int(i) => i32::try_from(i).is_ok(),
        // NaN compares false and is rejected
        Scalar::Float(f) => f.abs() <= float_limit,
    }
}

fn range_fits(range: &ValueRange, float_limit: f64) -> bool {
    value_fits(range.lower, float_limit) && value_fits(range.upper, float_limit)
}

/// Forward closure over consumers, starting from (and including) `initial`.
///
/// Consumers matching `skip` are neither included nor traversed through.
pub fn dominated_nodes(
    body: &LoopBody,
    initial: impl IntoIterator<Item = NodeId>,
    skip: impl Fn(&Node) -> bool,
) -> Result<IndexSet<NodeId>> {
    let mut queue: Vec<NodeId> = initial.into_iter().collect();
    let mut dominated: IndexSet<NodeId> = queue.iter().copied().collect();
    while let Some(id) = queue.pop() {
        for &user in body.node(id)?.users() {
            if skip(body.node(user)?) {
                continue;
            }
            if dominated.insert(user) {
                queue.push(user);
            }
        }
    }
    Ok(dominated)
}

/// Submodule handling for the range interpretation.
///
/// `masked_subblock` keeps the default: data loaded inside the sub-block is
/// already unbounded, so mask and fallback value are ignored.
struct RangeHooks<'a> {
    body: &'a LoopBody,
    solver: &'a mut IndexBoundSolver,
}

impl SubmoduleHooks<ValueRange> for RangeHooks<'_> {
    fn get_index(&mut self, name: &str) -> loopidx_ir::Result<ValueRange> {
        self.solver.get_index(name)
    }

    fn set_indirect(&mut self, slot: usize, value: ValueRange) -> loopidx_ir::Result<ValueRange> {
        let var = self.body.indirect_var(slot)?.clone();
        self.solver.bind(var, value);
        Ok(value)
    }
}

/// Value-range analysis plus narrowing decisions for one loop body
pub struct OptimizeIndexing<'g> {
    body: &'g LoopBody,
    config: NarrowingConfig,
    solver: IndexBoundSolver,
    index_indirect_dependencies: IndexMap<String, BTreeSet<Symbol>>,
    tensor_values: IndexSet<NodeId>,
    env: Env<ValueRange>,
}

impl<'g> OptimizeIndexing<'g> {
    /// Set up the pass over `body`, with index expressions already written in
    /// terms of the symbols in `index_ranges`.
    pub fn new(
        body: &'g LoopBody,
        index_ranges: &IndexMap<Symbol, i64>,
        indexing_exprs: IndexMap<String, Expr>,
        config: NarrowingConfig,
    ) -> Result<Self> {
        let indirect: HashSet<&Symbol> = body.indirect_vars().iter().collect();
        let index_indirect_dependencies = indexing_exprs
            .iter()
            .map(|(name, expr)| {
                let deps = expr
                    .free_symbols()
                    .into_iter()
                    .filter(|s| indirect.contains(s))
                    .collect();
                (name.clone(), deps)
            })
            .collect();

        let mut solver = IndexBoundSolver::new(indexing_exprs);
        for (symbol, extent) in index_ranges {
            solver.bind(symbol.clone(), ValueRange::new(0i64, (*extent - 1).max(0)));
        }

        let sources = body
            .all_nodes()
            .filter(|n| matches!(n.opcode, Opcode::Load | Opcode::Reduction | Opcode::MaskedSubblock(_)))
            .map(|n| n.id);
        let tensor_values = dominated_nodes(body, sources, |_| false)?;

        Ok(Self {
            body,
            config,
            solver,
            index_indirect_dependencies,
            tensor_values,
            env: Env::new(),
        })
    }

    /// Set up the pass using the body's own loop variables and index expressions
    pub fn for_body(body: &'g LoopBody, config: NarrowingConfig) -> Result<Self> {
        Self::new(body, body.var_ranges(), body.indexing_exprs().clone(), config)
    }

    /// Ranges computed by the last `run`
    pub fn env(&self) -> &Env<ValueRange> {
        &self.env
    }

    pub fn tensor_values(&self) -> &IndexSet<NodeId> {
        &self.tensor_values
    }

    pub fn solver(&self) -> &IndexBoundSolver {
        &self.solver
    }

    /// Compute value ranges and decide which int64 casts can become int32
    pub fn run(&mut self) -> Result<NarrowingReport> {
        if !self.config.enabled {
            debug!("index narrowing disabled");
            return Ok(NarrowingReport::default());
        }
        let body = self.body;

        // avoid computing tensor-derived values; masked sub-blocks still have to
        // run so their contents get ranges, and indirect bindings have to happen
        for &id in &self.tensor_values {
            let node = body.node(id)?;
            if !matches!(node.opcode, Opcode::MaskedSubblock(_) | Opcode::SetIndirect(_)) {
                self.env.insert(id, ValueRange::unbounded());
            }
        }

        let mut handler = ValueRangeAnalysis::from_config(&self.config);
        let mut hooks = RangeHooks {
            body,
            solver: &mut self.solver,
        };
        Interpreter::new(body).run(&mut self.env, &mut handler, &mut hooks)?;

        let candidates: Vec<NodeId> = body
            .all_nodes()
            .filter(|n| n.cast_target() == Some(Dtype::Int64) && !self.tensor_values.contains(&n.id))
            .map(|n| n.id)
            .collect();

        let mut report = NarrowingReport::default();
        for candidate in candidates {
            let (dominated, outcome) = self.try_to_reduce_precision(candidate)?;
            match &outcome {
                NarrowingOutcome::Narrowed => {
                    debug!(node = %candidate, dominated, "narrowing int64 cast to int32");
                    report.decisions.push(NarrowingDecision {
                        node: candidate,
                        from: Dtype::Int64,
                        to: Dtype::Int32,
                    });
                }
                NarrowingOutcome::Kept { reason } => {
                    debug!(node = %candidate, %reason, "keeping int64 cast");
                }
            }
            report.candidates.push(CandidateReport {
                node: candidate,
                dominated,
                outcome,
            });
        }
        info!(
            candidates = report.candidates.len(),
            narrowed = report.narrowed_count(),
            "index narrowing finished"
        );
        Ok(report)
    }

    fn fits(&self, range: &ValueRange) -> bool {
        range_fits(range, self.config.float_limit())
    }

    fn try_to_reduce_precision(&mut self, candidate: NodeId) -> Result<(usize, NarrowingOutcome)> {
        let body = self.body;
        // a downstream cast to int32 or a float type fixes the precision of
        // that chain of uses
        let dominated = {
            let config = &self.config;
            dominated_nodes(body, [candidate], |n| {
                n.cast_target().is_some_and(|d| config.stops_traversal(d))
            })?
        };
        let kept = |reason| Ok((dominated.len(), NarrowingOutcome::Kept { reason }));

        for &id in &dominated {
            let node = body.node(id)?;
            if node.opcode.is_sink() {
                continue;
            }

            if let Opcode::SetIndirect(slot) = node.opcode {
                let var = body.indirect_var(slot)?;
                let dependent: Vec<String> = self
                    .index_indirect_dependencies
                    .iter()
                    .filter(|(_, vars)| vars.contains(var))
                    .map(|(name, _)| name.clone())
                    .collect();
                for index in dependent {
                    let range = self.solver.get_index(&index)?;
                    if range.has_infinite_bound() {
                        return kept(KeepReason::IndirectIndexUnbounded { node: id, index });
                    }
                    // indices are integers
                    let truncated = range.unary_map(Scalar::truncate);
                    if !self.fits(&truncated) {
                        return kept(KeepReason::IndirectIndexNotExpressible {
                            node: id,
                            index,
                            range: truncated,
                        });
                    }
                }
            }

            match self.env.get(id) {
                Some(range) if self.fits(range) => {}
                Some(range) => {
                    return kept(KeepReason::NotExpressible {
                        node: id,
                        range: *range,
                    })
                }
                None => return kept(KeepReason::NoRange { node: id }),
            }
        }
        Ok((dominated.len(), NarrowingOutcome::Narrowed))
    }
}

/// Rewrite the casts named by `decisions`; returns how many were applied
pub fn apply_decisions(body: &mut LoopBody, decisions: &[NarrowingDecision]) -> Result<usize> {
    for decision in decisions {
        let previous = body.set_cast_dtype(decision.node, decision.to)?;
        debug!(node = %decision.node, from = %previous, to = %decision.to, "rewrote cast");
    }
    Ok(decisions.len())
}

/// Index expressions with loop variables renamed to `indices`, in order
fn renamed_indexing_exprs(body: &LoopBody, indices: &IndexMap<Symbol, i64>) -> Result<IndexMap<String, Expr>> {
    let loop_vars = body.var_ranges();
    if indices.len() != loop_vars.len() {
        return Err(RangeError::LoopVarMismatch {
            expected: loop_vars.len(),
            actual: indices.len(),
        });
    }
    if let Some(collision) = indices.keys().find(|s| loop_vars.contains_key(*s)) {
        return Err(RangeError::IndexSymbolCollision(collision.clone()));
    }
    let renames: HashMap<Symbol, Expr> = loop_vars
        .keys()
        .cloned()
        .zip(indices.keys().cloned().map(Expr::from))
        .collect();
    Ok(body
        .indexing_exprs()
        .iter()
        .map(|(name, expr)| (name.clone(), expr.subs(&renames)))
        .collect())
}

/// Narrow int64 index arithmetic in `body` to int32 where value ranges allow.
///
/// `indices` supplies one fresh symbol per loop variable (in loop-variable
/// order) together with its extent.
pub fn indexing_dtype_strength_reduction(
    body: &mut LoopBody,
    indices: &IndexMap<Symbol, i64>,
) -> anyhow::Result<NarrowingReport> {
    indexing_dtype_strength_reduction_with_config(body, indices, &NarrowingConfig::default())
}

pub fn indexing_dtype_strength_reduction_with_config(
    body: &mut LoopBody,
    indices: &IndexMap<Symbol, i64>,
    config: &NarrowingConfig,
) -> anyhow::Result<NarrowingReport> {
    let indexing = renamed_indexing_exprs(body, indices).context("invalid index symbols")?;
    let report = OptimizeIndexing::new(body, indices, indexing, config.clone())
        .and_then(|mut pass| pass.run())
        .context("value range analysis failed")?;
    apply_decisions(body, &report.decisions).context("failed to rewrite narrowed casts")?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopidx_ir::{BinaryOp, ROOT_BLOCK};
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_int32_boundaries() {
        assert!(val_expressible_in_32_bits(Scalar::Int(i64::from(i32::MAX))));
        assert!(val_expressible_in_32_bits(Scalar::Int(i64::from(i32::MIN))));
        assert!(!val_expressible_in_32_bits(Scalar::Int(1 << 31)));
        assert!(!val_expressible_in_32_bits(Scalar::Int(-(1 << 31) - 1)));
    }

    #[test]
    fn test_float_mantissa_boundaries() {
        assert!(val_expressible_in_32_bits(Scalar::Float(16_777_216.0)));
        assert!(val_expressible_in_32_bits(Scalar::Float(-16_777_216.0)));
        assert!(!val_expressible_in_32_bits(Scalar::Float(16_777_217.0)));
        assert!(!val_expressible_in_32_bits(Scalar::INFINITY));
        assert!(!val_expressible_in_32_bits(Scalar::Float(f64::NAN)));
        assert!(val_expressible_in_32_bits(Scalar::Bool(true)));
    }

    #[test]
    fn test_range_expressible_needs_both_bounds() {
        assert!(range_expressible_in_32_bits(&ValueRange::new(0i64, 396i64)));
        assert!(!range_expressible_in_32_bits(&ValueRange::new(0i64, 1i64 << 31)));
        assert!(!range_expressible_in_32_bits(&ValueRange::unbounded()));
        assert!(range_expressible_in_32_bits(&ValueRange::unbounded_bool()));
    }

    #[quickcheck]
    fn prop_ints_fit_iff_in_i32(v: i64) -> bool {
        val_expressible_in_32_bits(Scalar::Int(v)) == (i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&v)
    }

    #[quickcheck]
    fn prop_i32_values_always_fit(v: i32) -> bool {
        val_expressible_in_32_bits(Scalar::Int(i64::from(v)))
    }

    #[quickcheck]
    fn prop_floats_fit_iff_within_mantissa(v: f64) -> TestResult {
        if v.is_nan() {
            return TestResult::discard();
        }
        TestResult::from_bool(val_expressible_in_32_bits(Scalar::Float(v)) == (v.abs() <= FLOAT32_EXACT_LIMIT))
    }

    #[test]
    fn test_dominated_nodes_includes_start_and_honors_skip() {
        let mut body = LoopBody::new([(Symbol::new("x0"), 10)]);
        let mut root = body.block_mut(ROOT_BLOCK);
        let idx = root.get_index("index0").unwrap();
        let e = root.index_expr(idx, Dtype::Int32).unwrap();
        let cast = root.to_dtype(e, Dtype::Int64).unwrap();
        let narrow = root.to_dtype(cast, Dtype::Int32).unwrap();
        let after = root.binary(BinaryOp::Add, narrow, narrow).unwrap();
        let wide = root.binary(BinaryOp::Mul, cast, cast).unwrap();

        let all = dominated_nodes(&body, [cast], |_| false).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.contains(&after));

        let pruned = dominated_nodes(&body, [cast], |n| n.cast_target() == Some(Dtype::Int32)).unwrap();
        assert_eq!(pruned.iter().copied().collect::<Vec<_>>(), vec![cast, wide]);
    }

    #[test]
    fn test_renamed_indexing_exprs() {
        let x0 = Symbol::new("x0");
        let mut body = LoopBody::new([(x0.clone(), 10)]);
        body.add_indexing_expr("index0", Expr::from(x0.clone()) * Expr::int(3));
        let z0 = Symbol::new("z0");

        let renamed = renamed_indexing_exprs(&body, &IndexMap::from([(z0.clone(), 10)])).unwrap();
        assert_eq!(renamed["index0"], Expr::from(z0) * Expr::int(3));

        let err = renamed_indexing_exprs(&body, &IndexMap::new()).unwrap_err();
        assert!(matches!(err, RangeError::LoopVarMismatch { expected: 1, actual: 0 }));
        let err = renamed_indexing_exprs(&body, &IndexMap::from([(x0, 10)])).unwrap_err();
        assert!(matches!(err, RangeError::IndexSymbolCollision(_)));
    }

    #[test]
    fn test_empty_extent_seeds_zero() {
        let x0 = Symbol::new("x0");
        let body = LoopBody::new([(x0.clone(), 0)]);
        let pass = OptimizeIndexing::for_body(&body, NarrowingConfig::default()).unwrap();
        assert_eq!(pass.solver().table().symbol(&x0), Some(ValueRange::new(0i64, 0i64)));
    }

    #[test]
    fn test_disabled_pass_decides_nothing() {
        let x0 = Symbol::new("x0");
        let mut body = LoopBody::new([(x0.clone(), 10)]);
        body.add_indexing_expr("index0", Expr::from(x0));
        let mut root = body.block_mut(ROOT_BLOCK);
        let idx = root.get_index("index0").unwrap();
        let e = root.index_expr(idx, Dtype::Int32).unwrap();
        let cast = root.to_dtype(e, Dtype::Int64).unwrap();
        root.store("out_ptr0", idx, cast).unwrap();

        let config = NarrowingConfig::default().with_enabled(false);
        let report = OptimizeIndexing::for_body(&body, config).unwrap().run().unwrap();
        assert!(report.candidates.is_empty());

        let report = OptimizeIndexing::for_body(&body, NarrowingConfig::default())
            .unwrap()
            .run()
            .unwrap();
        assert!(report.is_narrowed(cast));
    }
}

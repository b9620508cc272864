//! # loopidx Ranges
//!
//! Value-range analysis over loop bodies and the int64 → int32 index
//! narrowing built on it.
//!
//! ## Modules
//!
//! - **[`lattice`]** - The interval domain and its combinators
//! - **[`semantics`]** - Per-opcode transfer functions
//! - **[`solver`]** - Monotonicity-based bounds for index expressions
//! - **[`narrowing`]** - The pass itself: seeding, interpretation and per-cast decisions
//! - **[`report`]** - Decisions and candidate outcomes
//! - **[`config`]** - Pass configuration
//!
//! ## Quick Start
//!
//! ```rust
//! use indexmap::IndexMap;
//! use loopidx_ir::prelude::*;
//! use loopidx_ranges::indexing_dtype_strength_reduction;
//!
//! let x0 = Symbol::new("x0");
//! let mut body = LoopBody::new([(x0.clone(), 100)]);
//! body.add_indexing_expr("index0", Expr::from(x0));
//!
//! let mut root = body.block_mut(ROOT_BLOCK);
//! let idx = root.get_index("index0").unwrap();
//! let value = root.index_expr(idx, Dtype::Int32).unwrap();
//! let cast = root.to_dtype(value, Dtype::Int64).unwrap();
//! root.store("out_ptr0", idx, cast).unwrap();
//!
//! let indices = IndexMap::from([(Symbol::new("z0"), 100)]);
//! let report = indexing_dtype_strength_reduction(&mut body, &indices).unwrap();
//! assert!(report.is_narrowed(cast));
//! assert_eq!(body.node(cast).unwrap().cast_target(), Some(Dtype::Int32));
//! ```

pub mod config;
pub mod error;
pub mod lattice;
pub mod narrowing;
pub mod report;
pub mod semantics;
pub mod solver;

pub use config::NarrowingConfig;
pub use error::{RangeError, Result};
pub use lattice::ValueRange;
pub use narrowing::{
    apply_decisions, dominated_nodes, indexing_dtype_strength_reduction,
    indexing_dtype_strength_reduction_with_config, range_expressible_in_32_bits, val_expressible_in_32_bits,
    OptimizeIndexing, FLOAT32_EXACT_LIMIT,
};
pub use report::{CandidateReport, KeepReason, NarrowingDecision, NarrowingOutcome, NarrowingReport};
pub use semantics::ValueRangeAnalysis;
pub use solver::{IndexBoundSolver, Monotonicity, ReplacementTable};

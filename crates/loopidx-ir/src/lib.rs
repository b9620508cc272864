//! # loopidx IR
//!
//! The loop-body representation consumed by the loopidx range analysis.
//!
//! ## Modules
//!
//! - **[`scalar`]** - Bool/int/float values with overflow-promoting arithmetic
//! - **[`symbolic`]** - Index expressions with substitution, differentiation and sign queries
//! - **[`graph`]** - Node arena, blocks, index variables and named index expressions
//! - **[`interp`]** - Block interpreter with pluggable op handlers and submodule hooks
//!
//! ## Quick Start
//!
//! ```rust
//! use loopidx_ir::prelude::*;
//!
//! let x0 = Symbol::new("x0");
//! let mut body = LoopBody::new([(x0.clone(), 128)]);
//! body.add_indexing_expr("index0", Expr::from(x0) * Expr::int(2));
//!
//! let mut root = body.block_mut(ROOT_BLOCK);
//! let idx = root.get_index("index0").unwrap();
//! let value = root.index_expr(idx, Dtype::Int64).unwrap();
//! root.store("out_ptr0", idx, value).unwrap();
//! assert_eq!(body.len(), 3);
//! ```

pub mod error;
pub mod graph;
pub mod interp;
pub mod scalar;
pub mod symbolic;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{IrError, Result};
    pub use crate::graph::{
        masked_subblock_name, Arg, BinaryOp, Block, BlockBuilder, BoolOp, Dtype, LoopBody, Node, NodeId, Opcode,
        UnaryOp, ROOT_BLOCK,
    };
    pub use crate::interp::{Env, Interpreter, Operand, OpsHandler, SubmoduleHooks};
    pub use crate::scalar::Scalar;
    pub use crate::symbolic::{Expr, Sign, Symbol};
}

pub use error::{IrError, Result};
pub use graph::{Arg, BinaryOp, Block, BoolOp, Dtype, LoopBody, Node, NodeId, Opcode, UnaryOp, ROOT_BLOCK};
pub use interp::{Env, Interpreter, Operand, OpsHandler, SubmoduleHooks};
pub use scalar::Scalar;
pub use symbolic::{Expr, Sign, Symbol};

//! Errors raised when a loop body or its interpretation breaks an invariant

use crate::graph::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IrError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("node {arg} is not defined in block '{block}'")]
    CrossBlockArgument { arg: NodeId, block: String },

    #[error("unknown sub-block '{0}'")]
    UnknownSubblock(String),

    #[error("block '{block}' must have exactly one output node, found {count}")]
    MalformedOutput { block: String, count: usize },

    #[error("unknown index expression '{0}'")]
    UnknownIndexExpr(String),

    #[error("no indirect variable for slot {0}")]
    UnknownIndirectSlot(usize),

    #[error("node {0} is not a to_dtype cast")]
    NotACast(NodeId),

    #[error("argument {arg} of node {user} has no value")]
    MissingValue { user: NodeId, arg: NodeId },

    #[error("{opcode} expects {expected} as argument {position}")]
    InvalidOperand {
        opcode: String,
        position: usize,
        expected: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, IrError>;

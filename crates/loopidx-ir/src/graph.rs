//! Loop-body graph model
//!
//! A `LoopBody` owns an arena of nodes grouped into a root block plus named
//! sub-blocks (`masked_subblock<i>` regions). Each node carries an opcode, an
//! ordered argument list and the set of nodes consuming its value. Consumer
//! edges never leave a block.

use crate::error::{IrError, Result};
use crate::scalar::Scalar;
use crate::symbolic::{Expr, Symbol};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Opaque node identifier (index into the `LoopBody` arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Element type of a kernel value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Bool,
    UInt8,
    Int8,
    Int16,
    Int32,
    Int64,
    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl Dtype {
    pub fn is_floating_point(self) -> bool {
        matches!(self, Dtype::Float16 | Dtype::BFloat16 | Dtype::Float32 | Dtype::Float64)
    }

    pub fn name(self) -> &'static str {
        match self {
            Dtype::Bool => "bool",
            Dtype::UInt8 => "uint8",
            Dtype::Int8 => "int8",
            Dtype::Int16 => "int16",
            Dtype::Int32 => "int32",
            Dtype::Int64 => "int64",
            Dtype::Float16 => "float16",
            Dtype::BFloat16 => "bfloat16",
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Elementwise unary math operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Reciprocal,
    Neg,
    Abs,
    Sqrt,
    Square,
    Exp,
    Log,
    Floor,
    Ceil,
    Trunc,
    Round,
    Relu,
    Sigmoid,
    Tanh,
    Sin,
    Cos,
}

impl UnaryOp {
    /// Every unary op, in declaration order
    pub const ALL: [UnaryOp; 16] = [
        UnaryOp::Reciprocal,
        UnaryOp::Neg,
        UnaryOp::Abs,
        UnaryOp::Sqrt,
        UnaryOp::Square,
        UnaryOp::Exp,
        UnaryOp::Log,
        UnaryOp::Floor,
        UnaryOp::Ceil,
        UnaryOp::Trunc,
        UnaryOp::Round,
        UnaryOp::Relu,
        UnaryOp::Sigmoid,
        UnaryOp::Tanh,
        UnaryOp::Sin,
        UnaryOp::Cos,
    ];

    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Reciprocal => "reciprocal",
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Square => "square",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Floor => "floor",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Trunc => "trunc",
            UnaryOp::Round => "round",
            UnaryOp::Relu => "relu",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
        }
    }
}

/// Elementwise binary math operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    TrueDiv,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Minimum,
    Maximum,
}

impl BinaryOp {
    const ALL: [BinaryOp; 10] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::TrueDiv,
        BinaryOp::Div,
        BinaryOp::FloorDiv,
        BinaryOp::Mod,
        BinaryOp::Pow,
        BinaryOp::Minimum,
        BinaryOp::Maximum,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::TrueDiv => "truediv",
            BinaryOp::Div => "div",
            BinaryOp::FloorDiv => "floordiv",
            BinaryOp::Mod => "mod",
            BinaryOp::Pow => "pow",
            BinaryOp::Minimum => "minimum",
            BinaryOp::Maximum => "maximum",
        }
    }
}

/// Comparison and logical operations (always boolean-valued)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Xor,
    LogicalAnd,
    LogicalOr,
    LogicalNot,
}

impl BoolOp {
    const ALL: [BoolOp; 12] = [
        BoolOp::Eq,
        BoolOp::Ne,
        BoolOp::Lt,
        BoolOp::Gt,
        BoolOp::Le,
        BoolOp::Ge,
        BoolOp::And,
        BoolOp::Or,
        BoolOp::Xor,
        BoolOp::LogicalAnd,
        BoolOp::LogicalOr,
        BoolOp::LogicalNot,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BoolOp::Eq => "eq",
            BoolOp::Ne => "ne",
            BoolOp::Lt => "lt",
            BoolOp::Gt => "gt",
            BoolOp::Le => "le",
            BoolOp::Ge => "ge",
            BoolOp::And => "and_",
            BoolOp::Or => "or_",
            BoolOp::Xor => "xor",
            BoolOp::LogicalAnd => "logical_and",
            BoolOp::LogicalOr => "logical_or",
            BoolOp::LogicalNot => "logical_not",
        }
    }
}

/// What a node computes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `load(buffer, index)`
    Load,
    /// `store(buffer, index, value)`
    Store,
    /// `reduction(buffer, dtype, src_dtype, reduction_type, index, value)`
    Reduction,
    /// `index_expr(index, dtype)`
    IndexExpr,
    /// `to_dtype(value, dtype)`
    ToDtype,
    /// `constant(value, dtype)`
    Constant,
    /// `where(cond, a, b)`
    Where,
    Unary(UnaryOp),
    Binary(BinaryOp),
    Bool(BoolOp),
    /// `get_index(name)`: resolve a named index expression
    GetIndex,
    /// `masked_subblock<i>(mask, other)`: evaluate a nested region
    MaskedSubblock(usize),
    /// `set_indirect<i>(value)`: bind indirect index variable `i`
    SetIndirect(usize),
    /// `output(value)`: the block's result
    Output,
    /// Any opcode outside the known vocabulary
    Other(String),
}

impl Opcode {
    /// Parse an opcode name. Unknown names become `Opcode::Other`.
    pub fn parse(name: &str) -> Opcode {
        match name {
            "load" => return Opcode::Load,
            "store" => return Opcode::Store,
            "reduction" => return Opcode::Reduction,
            "index_expr" => return Opcode::IndexExpr,
            "to_dtype" => return Opcode::ToDtype,
            "constant" => return Opcode::Constant,
            "where" => return Opcode::Where,
            "get_index" => return Opcode::GetIndex,
            "output" => return Opcode::Output,
            _ => {}
        }
        if let Some(op) = UnaryOp::ALL.into_iter().find(|op| op.name() == name) {
            return Opcode::Unary(op);
        }
        if let Some(op) = BinaryOp::ALL.into_iter().find(|op| op.name() == name) {
            return Opcode::Binary(op);
        }
        if let Some(op) = BoolOp::ALL.into_iter().find(|op| op.name() == name) {
            return Opcode::Bool(op);
        }
        if let Some(slot) = parse_slot(name, "masked_subblock") {
            return Opcode::MaskedSubblock(slot);
        }
        if let Some(slot) = parse_slot(name, "set_indirect") {
            return Opcode::SetIndirect(slot);
        }
        Opcode::Other(name.to_string())
    }

    pub fn is_sink(&self) -> bool {
        matches!(self, Opcode::Store | Opcode::Output)
    }
}

fn parse_slot(name: &str, prefix: &str) -> Option<usize> {
    name.strip_prefix(prefix)?.parse().ok()
}

/// Name of the sub-block invoked by `masked_subblock<slot>`
pub fn masked_subblock_name(slot: usize) -> String {
    format!("masked_subblock{}", slot)
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Load => f.write_str("load"),
            Opcode::Store => f.write_str("store"),
            Opcode::Reduction => f.write_str("reduction"),
            Opcode::IndexExpr => f.write_str("index_expr"),
            Opcode::ToDtype => f.write_str("to_dtype"),
            Opcode::Constant => f.write_str("constant"),
            Opcode::Where => f.write_str("where"),
            Opcode::Unary(op) => f.write_str(op.name()),
            Opcode::Binary(op) => f.write_str(op.name()),
            Opcode::Bool(op) => f.write_str(op.name()),
            Opcode::GetIndex => f.write_str("get_index"),
            Opcode::MaskedSubblock(slot) => write!(f, "masked_subblock{}", slot),
            Opcode::SetIndirect(slot) => write!(f, "set_indirect{}", slot),
            Opcode::Output => f.write_str("output"),
            Opcode::Other(name) => f.write_str(name),
        }
    }
}

/// A node argument: another node's value or a literal
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Node(NodeId),
    Scalar(Scalar),
    Dtype(Dtype),
    Name(String),
}

impl Arg {
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Arg::Node(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<NodeId> for Arg {
    fn from(id: NodeId) -> Self {
        Arg::Node(id)
    }
}

impl From<Dtype> for Arg {
    fn from(dtype: Dtype) -> Self {
        Arg::Dtype(dtype)
    }
}

impl From<Scalar> for Arg {
    fn from(value: Scalar) -> Self {
        Arg::Scalar(value)
    }
}

impl From<&str> for Arg {
    fn from(name: &str) -> Self {
        Arg::Name(name.to_string())
    }
}

/// A node in a loop-body block
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub opcode: Opcode,
    pub args: SmallVec<[Arg; 3]>,
    users: Vec<NodeId>,
}

impl Node {
    /// Consumers of this node's value, in insertion order
    pub fn users(&self) -> &[NodeId] {
        &self.users
    }

    /// Node arguments, skipping literals
    pub fn node_args(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.args.iter().filter_map(Arg::as_node)
    }

    /// Target dtype when this node is a `to_dtype` cast
    pub fn cast_target(&self) -> Option<Dtype> {
        if self.opcode != Opcode::ToDtype {
            return None;
        }
        match self.args.get(1) {
            Some(Arg::Dtype(dtype)) => Some(*dtype),
            _ => None,
        }
    }
}

/// An ordered group of nodes evaluated together
#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    nodes: Vec<NodeId>,
}

impl Block {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Node ids in evaluation order
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

pub const ROOT_BLOCK: &str = "root";

/// A loop body: node arena, blocks, index variables and index expressions
#[derive(Debug, Clone)]
pub struct LoopBody {
    nodes: Vec<Node>,
    owner: Vec<Option<String>>,
    root: Block,
    subblocks: IndexMap<String, Block>,
    indirect_vars: Vec<Symbol>,
    var_ranges: IndexMap<Symbol, i64>,
    indexing_exprs: IndexMap<String, Expr>,
}

impl LoopBody {
    /// Create a loop body over the given loop variables and their extents
    pub fn new(var_ranges: impl IntoIterator<Item = (Symbol, i64)>) -> Self {
        Self {
            nodes: Vec::new(),
            owner: Vec::new(),
            root: Block::new(ROOT_BLOCK),
            subblocks: IndexMap::new(),
            indirect_vars: Vec::new(),
            var_ranges: var_ranges.into_iter().collect(),
            indexing_exprs: IndexMap::new(),
        }
    }

    /// Register a named index expression
    pub fn add_indexing_expr(&mut self, name: impl Into<String>, expr: Expr) {
        self.indexing_exprs.insert(name.into(), expr);
    }

    /// Allocate the next indirect index variable (`indirect0`, `indirect1`, ...)
    pub fn add_indirect_var(&mut self) -> Symbol {
        let symbol = Symbol::new(format!("indirect{}", self.indirect_vars.len()));
        self.indirect_vars.push(symbol.clone());
        symbol
    }

    pub fn indirect_vars(&self) -> &[Symbol] {
        &self.indirect_vars
    }

    pub fn indirect_var(&self, slot: usize) -> Result<&Symbol> {
        self.indirect_vars
            .get(slot)
            .ok_or(IrError::UnknownIndirectSlot(slot))
    }

    pub fn var_ranges(&self) -> &IndexMap<Symbol, i64> {
        &self.var_ranges
    }

    pub fn indexing_exprs(&self) -> &IndexMap<String, Expr> {
        &self.indexing_exprs
    }

    pub fn indexing_expr(&self, name: &str) -> Result<&Expr> {
        self.indexing_exprs
            .get(name)
            .ok_or_else(|| IrError::UnknownIndexExpr(name.to_string()))
    }

    pub fn root(&self) -> &Block {
        &self.root
    }

    pub fn subblock(&self, name: &str) -> Result<&Block> {
        self.subblocks
            .get(name)
            .ok_or_else(|| IrError::UnknownSubblock(name.to_string()))
    }

    /// Root block followed by sub-blocks in insertion order
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        std::iter::once(&self.root).chain(self.subblocks.values())
    }

    /// Every node of every block, root block first
    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.blocks()
            .flat_map(move |block| block.nodes.iter().map(move |id| &self.nodes[id.0]))
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(IrError::UnknownNode(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The single `output` node of a block
    pub fn output_node(&self, block: &Block) -> Result<NodeId> {
        let outputs: Vec<NodeId> = block
            .nodes
            .iter()
            .copied()
            .filter(|id| self.nodes[id.0].opcode == Opcode::Output)
            .collect();
        match outputs.as_slice() {
            [id] => Ok(*id),
            _ => Err(IrError::MalformedOutput {
                block: block.name.clone(),
                count: outputs.len(),
            }),
        }
    }

    /// Append a node to a block (`ROOT_BLOCK` or a sub-block name, created on first use).
    ///
    /// Node arguments must already exist in the same block.
    pub fn add_node(
        &mut self,
        block: &str,
        opcode: Opcode,
        args: impl IntoIterator<Item = Arg>,
    ) -> Result<NodeId> {
        let args: SmallVec<[Arg; 3]> = args.into_iter().collect();
        let owner = (block != ROOT_BLOCK).then(|| block.to_string());
        for arg in args.iter().filter_map(Arg::as_node) {
            match self.owner.get(arg.0) {
                Some(arg_owner) if *arg_owner == owner => {}
                Some(_) => {
                    return Err(IrError::CrossBlockArgument {
                        arg,
                        block: block.to_string(),
                    })
                }
                None => return Err(IrError::UnknownNode(arg)),
            }
        }

        let id = NodeId(self.nodes.len());
        for arg in args.iter().filter_map(Arg::as_node) {
            let users = &mut self.nodes[arg.0].users;
            if !users.contains(&id) {
                users.push(id);
            }
        }
        self.nodes.push(Node {
            id,
            opcode,
            args,
            users: Vec::new(),
        });
        self.owner.push(owner);
        match block {
            ROOT_BLOCK => self.root.nodes.push(id),
            name => self
                .subblocks
                .entry(name.to_string())
                .or_insert_with(|| Block::new(name))
                .nodes
                .push(id),
        }
        Ok(id)
    }

    /// Builder over one block
    pub fn block_mut(&mut self, block: &str) -> BlockBuilder<'_> {
        BlockBuilder {
            body: self,
            block: block.to_string(),
        }
    }

    /// Rewrite the target dtype of a `to_dtype` node, returning the previous one
    pub fn set_cast_dtype(&mut self, id: NodeId, dtype: Dtype) -> Result<Dtype> {
        let node = self.nodes.get_mut(id.0).ok_or(IrError::UnknownNode(id))?;
        let previous = node.cast_target().ok_or(IrError::NotACast(id))?;
        node.args[1] = Arg::Dtype(dtype);
        Ok(previous)
    }
}

/// Convenience builder for appending nodes to one block
pub struct BlockBuilder<'a> {
    body: &'a mut LoopBody,
    block: String,
}

impl BlockBuilder<'_> {
    pub fn node(&mut self, opcode: Opcode, args: impl IntoIterator<Item = Arg>) -> Result<NodeId> {
        self.body.add_node(&self.block, opcode, args)
    }

    pub fn get_index(&mut self, name: &str) -> Result<NodeId> {
        self.node(Opcode::GetIndex, [Arg::from(name)])
    }

    pub fn index_expr(&mut self, index: NodeId, dtype: Dtype) -> Result<NodeId> {
        self.node(Opcode::IndexExpr, [index.into(), dtype.into()])
    }

    pub fn load(&mut self, buffer: &str, index: NodeId) -> Result<NodeId> {
        self.node(Opcode::Load, [Arg::from(buffer), index.into()])
    }

    pub fn store(&mut self, buffer: &str, index: NodeId, value: NodeId) -> Result<NodeId> {
        self.node(Opcode::Store, [Arg::from(buffer), index.into(), value.into()])
    }

    pub fn reduction(&mut self, buffer: &str, dtype: Dtype, index: NodeId, value: NodeId) -> Result<NodeId> {
        self.node(
            Opcode::Reduction,
            [
                Arg::from(buffer),
                dtype.into(),
                dtype.into(),
                Arg::from("sum"),
                index.into(),
                value.into(),
            ],
        )
    }

    pub fn constant(&mut self, value: impl Into<Scalar>, dtype: Dtype) -> Result<NodeId> {
        self.node(Opcode::Constant, [Arg::Scalar(value.into()), dtype.into()])
    }

    pub fn to_dtype(&mut self, value: NodeId, dtype: Dtype) -> Result<NodeId> {
        self.node(Opcode::ToDtype, [value.into(), dtype.into()])
    }

    pub fn unary(&mut self, op: UnaryOp, x: NodeId) -> Result<NodeId> {
        self.node(Opcode::Unary(op), [x.into()])
    }

    pub fn binary(&mut self, op: BinaryOp, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.node(Opcode::Binary(op), [a.into(), b.into()])
    }

    pub fn compare(&mut self, op: BoolOp, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.node(Opcode::Bool(op), [a.into(), b.into()])
    }

    pub fn select(&mut self, cond: NodeId, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.node(Opcode::Where, [cond.into(), a.into(), b.into()])
    }

    pub fn masked_subblock(&mut self, slot: usize, mask: NodeId, other: impl Into<Scalar>) -> Result<NodeId> {
        self.node(Opcode::MaskedSubblock(slot), [mask.into(), Arg::Scalar(other.into())])
    }

    pub fn set_indirect(&mut self, slot: usize, value: NodeId) -> Result<NodeId> {
        self.node(Opcode::SetIndirect(slot), [value.into()])
    }

    pub fn output(&mut self, value: NodeId) -> Result<NodeId> {
        self.node(Opcode::Output, [value.into()])
    }
}

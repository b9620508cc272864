//! Symbolic bound solver for index expressions
//!
//! Rather than pushing intervals through every sub-term, the solver looks at
//! the sign of each partial derivative. A symbol whose derivative is provably
//! non-negative is monotonically increasing, so the expression's maximum takes
//! that symbol's upper bound and its minimum the lower bound; provably
//! non-positive derivatives flip the choice. If any symbol's direction is
//! unknown the solver gives up and returns the unbounded range.
//!
//! Signs of the symbols inside a derivative come from their bound ranges, so
//! an indirect variable bound to a negative range is not mistaken for a
//! positive one. Unbound symbols are assumed positive.
//!
//! Floor division and constant-modulus modular indexing are relaxed to plain
//! division before differentiating. Bounds are then computed on the original
//! expression.

use crate::lattice::ValueRange;
use indexmap::IndexMap;
use loopidx_ir::{Expr, Scalar, Sign, Symbol};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Known ranges for symbols, memoized expressions and memoized index names
#[derive(Debug, Clone, Default)]
pub struct ReplacementTable {
    symbols: HashMap<Symbol, ValueRange>,
    exprs: HashMap<Expr, ValueRange>,
    names: HashMap<String, ValueRange>,
}

impl ReplacementTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, symbol: Symbol, range: ValueRange) {
        self.symbols.insert(symbol, range);
    }

    pub fn symbol(&self, symbol: &Symbol) -> Option<ValueRange> {
        self.symbols.get(symbol).copied()
    }

    /// Memoized range for an expression; a bare symbol resolves to its binding
    pub fn expr(&self, expr: &Expr) -> Option<ValueRange> {
        match expr {
            Expr::Symbol(s) => self.symbol(s),
            _ => self.exprs.get(expr).copied(),
        }
    }

    pub fn index(&self, name: &str) -> Option<ValueRange> {
        self.names.get(name).copied()
    }

    /// Possible signs of a symbol under its binding; unbound symbols are positive
    pub fn sign_of(&self, symbol: &Symbol) -> Sign {
        let Some(range) = self.symbol(symbol) else {
            return Sign::POSITIVE;
        };
        let zero = Scalar::Int(0);
        match (range.lower.compare(&zero), range.upper.compare(&zero)) {
            (Some(Ordering::Greater), _) => Sign::POSITIVE,
            (Some(Ordering::Equal), _) => Sign::NONNEGATIVE,
            (_, Some(Ordering::Less)) => Sign::NEGATIVE,
            (_, Some(Ordering::Equal)) => Sign::NONPOSITIVE,
            _ => Sign::UNKNOWN,
        }
    }
}

/// Direction of an expression in one of its symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Monotonicity {
    Increasing,
    Decreasing,
    Other,
}

/// Classify `expr` in `symbol` by the sign of its relaxed partial derivative
pub fn classify(relaxed: &Expr, symbol: &Symbol, table: &ReplacementTable) -> Monotonicity {
    match relaxed.diff(symbol).map(|d| d.sign_with(&|s| table.sign_of(s))) {
        Some(sign) if sign.is_nonnegative() => Monotonicity::Increasing,
        Some(sign) if sign.is_nonpositive() => Monotonicity::Decreasing,
        _ => Monotonicity::Other,
    }
}

/// Resolves named index expressions to value ranges
#[derive(Debug, Clone)]
pub struct IndexBoundSolver {
    indexing_exprs: IndexMap<String, Expr>,
    table: ReplacementTable,
}

impl IndexBoundSolver {
    pub fn new(indexing_exprs: IndexMap<String, Expr>) -> Self {
        Self {
            indexing_exprs,
            table: ReplacementTable::new(),
        }
    }

    /// Bind a loop or indirect variable to a range
    pub fn bind(&mut self, symbol: Symbol, range: ValueRange) {
        trace!(symbol = %symbol, range = %range, "binding symbol");
        self.table.bind(symbol, range);
    }

    pub fn table(&self) -> &ReplacementTable {
        &self.table
    }

    pub fn indexing_exprs(&self) -> &IndexMap<String, Expr> {
        &self.indexing_exprs
    }

    /// Range of the named index expression, computed once per name
    pub fn get_index(&mut self, name: &str) -> loopidx_ir::Result<ValueRange> {
        if let Some(range) = self.table.index(name) {
            return Ok(range);
        }
        let expr = self
            .indexing_exprs
            .get(name)
            .cloned()
            .ok_or_else(|| loopidx_ir::IrError::UnknownIndexExpr(name.to_string()))?;
        let range = self.bound_expr(&expr);
        debug!(index = name, expr = %expr, range = %range, "resolved index expression");
        self.table.names.insert(name.to_string(), range);
        Ok(range)
    }

    /// Range of an arbitrary index expression under the current bindings
    pub fn bound_expr(&mut self, expr: &Expr) -> ValueRange {
        let symbols = expr.free_symbols();
        if symbols.is_empty() {
            return match expr.evaluate(&|_| None) {
                Some(v) => ValueRange::singleton(v),
                None => ValueRange::unbounded(),
            };
        }
        if let Some(range) = self.table.expr(expr) {
            return range;
        }

        let relaxed = expr.relax_index_ops();
        let mut increasing = Vec::new();
        let mut other = Vec::new();
        for symbol in &symbols {
            match classify(&relaxed, symbol, &self.table) {
                Monotonicity::Increasing => increasing.push(symbol.clone()),
                Monotonicity::Decreasing => {}
                Monotonicity::Other => other.push(symbol.clone()),
            }
        }
        if !other.is_empty() {
            debug!(expr = %expr, symbols = ?other, "non-monotonic index expression");
            return ValueRange::unbounded();
        }

        let corner = |take_upper_when_increasing: bool| {
            let table = &self.table;
            let increasing = &increasing;
            expr.evaluate(&move |s: &Symbol| {
                let range = table.symbol(s)?;
                if increasing.contains(s) == take_upper_when_increasing {
                    Some(range.upper)
                } else {
                    Some(range.lower)
                }
            })
        };
        let range = match (corner(false), corner(true)) {
            (Some(lower), Some(upper)) if ordered(lower, upper) => ValueRange::new(lower, upper),
            _ => ValueRange::unbounded(),
        };
        self.table.exprs.insert(expr.clone(), range);
        range
    }
}

fn ordered(lower: Scalar, upper: Scalar) -> bool {
    matches!(lower.compare(&upper), Some(Ordering::Less | Ordering::Equal))
}

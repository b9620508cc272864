//! Symbolic index expressions
//!
//! A deliberately small expression language covering what loop indexing
//! produces: integer constants, symbols, sums, products, integer powers,
//! integer-division indexing (`FloorDiv`) and modular indexing
//! (`ModularIndexing(x, div, modulus) = (x // div) % modulus`).
//!
//! Every symbol is assumed to be a positive integer, which is the convention
//! for loop and indirect index variables. Sign queries rely on that.
//!
//! Constructors perform light simplification only: nested sums and products
//! are flattened, constants are folded, and zero terms / unit factors drop out.

use crate::scalar::Scalar;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops;

/// A named index variable
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Symbol(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A symbolic index expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Int(i64),
    Symbol(Symbol),
    Add(Vec<Expr>),
    Mul(Vec<Expr>),
    Pow(Box<Expr>, i32),
    FloorDiv(Box<Expr>, Box<Expr>),
    ModularIndexing(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Int(value)
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Expr::Symbol(Symbol::new(name))
    }

    /// Sum of terms with constants folded and nested sums flattened
    pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Self {
        let mut constant: i64 = 0;
        let mut rest = Vec::new();
        let mut overflowed = Vec::new();
        for term in terms {
            let parts = match term {
                Expr::Add(inner) => inner,
                other => vec![other],
            };
            for part in parts {
                match part {
                    Expr::Int(v) => match constant.checked_add(v) {
                        Some(c) => constant = c,
                        None => overflowed.push(Expr::Int(v)),
                    },
                    other => rest.push(other),
                }
            }
        }
        if constant != 0 {
            rest.insert(0, Expr::Int(constant));
        }
        rest.extend(overflowed);
        match rest.len() {
            0 => Expr::Int(0),
            1 => rest.pop().unwrap_or(Expr::Int(0)),
            _ => Expr::Add(rest),
        }
    }

    /// Product of factors with constants folded and nested products flattened
    pub fn product(factors: impl IntoIterator<Item = Expr>) -> Self {
        let mut constant: i64 = 1;
        let mut rest = Vec::new();
        let mut overflowed = Vec::new();
        for factor in factors {
            let parts = match factor {
                Expr::Mul(inner) => inner,
                other => vec![other],
            };
            for part in parts {
                match part {
                    Expr::Int(0) => return Expr::Int(0),
                    Expr::Int(v) => match constant.checked_mul(v) {
                        Some(c) => constant = c,
                        None => overflowed.push(Expr::Int(v)),
                    },
                    other => rest.push(other),
                }
            }
        }
        if constant != 1 {
            rest.insert(0, Expr::Int(constant));
        }
        rest.extend(overflowed);
        match rest.len() {
            0 => Expr::Int(1),
            1 => rest.pop().unwrap_or(Expr::Int(1)),
            _ => Expr::Mul(rest),
        }
    }

    pub fn pow(base: Expr, exponent: i32) -> Self {
        match (base, exponent) {
            (_, 0) => Expr::Int(1),
            (base, 1) => base,
            (Expr::Int(b), e) if e > 0 => match b.checked_pow(e.unsigned_abs()) {
                Some(v) => Expr::Int(v),
                None => Expr::Pow(Box::new(Expr::Int(b)), e),
            },
            (Expr::Pow(inner, e1), e2) => match e1.checked_mul(e2) {
                Some(e) => Expr::pow(*inner, e),
                None => Expr::Pow(Box::new(Expr::Pow(inner, e1)), e2),
            },
            (base, e) => Expr::Pow(Box::new(base), e),
        }
    }

    /// Integer-division indexing: `floor(numerator / denominator)`
    pub fn floor_div(numerator: Expr, denominator: Expr) -> Self {
        match (numerator, denominator) {
            (n, Expr::Int(1)) => n,
            (Expr::Int(a), Expr::Int(b)) if b != 0 => match Scalar::Int(a).floor_div(Scalar::Int(b)) {
                Scalar::Int(q) => Expr::Int(q),
                _ => Expr::FloorDiv(Box::new(Expr::Int(a)), Box::new(Expr::Int(b))),
            },
            (n, d) => Expr::FloorDiv(Box::new(n), Box::new(d)),
        }
    }

    /// Modular indexing: `(x // divisor) % modulus`
    pub fn modular_indexing(x: Expr, divisor: Expr, modulus: Expr) -> Self {
        match (x, divisor, modulus) {
            (Expr::Int(a), Expr::Int(b), Expr::Int(m)) if b != 0 && m != 0 => {
                match Scalar::Int(a).floor_div(Scalar::Int(b)).modulo(Scalar::Int(m)) {
                    Scalar::Int(r) => Expr::Int(r),
                    _ => Expr::ModularIndexing(
                        Box::new(Expr::Int(a)),
                        Box::new(Expr::Int(b)),
                        Box::new(Expr::Int(m)),
                    ),
                }
            }
            (x, d, m) => Expr::ModularIndexing(Box::new(x), Box::new(d), Box::new(m)),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.free_symbols().is_empty()
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// All symbols occurring in the expression, in sorted order
    pub fn free_symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<Symbol>) {
        match self {
            Expr::Int(_) => {}
            Expr::Symbol(s) => {
                out.insert(s.clone());
            }
            Expr::Add(items) | Expr::Mul(items) => {
                for item in items {
                    item.collect_symbols(out);
                }
            }
            Expr::Pow(base, _) => base.collect_symbols(out),
            Expr::FloorDiv(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
            Expr::ModularIndexing(a, b, c) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
                c.collect_symbols(out);
            }
        }
    }

    pub fn contains_symbol(&self, symbol: &Symbol) -> bool {
        match self {
            Expr::Int(_) => false,
            Expr::Symbol(s) => s == symbol,
            Expr::Add(items) | Expr::Mul(items) => items.iter().any(|e| e.contains_symbol(symbol)),
            Expr::Pow(base, _) => base.contains_symbol(symbol),
            Expr::FloorDiv(a, b) => a.contains_symbol(symbol) || b.contains_symbol(symbol),
            Expr::ModularIndexing(a, b, c) => {
                a.contains_symbol(symbol) || b.contains_symbol(symbol) || c.contains_symbol(symbol)
            }
        }
    }

    /// Replace symbols by expressions, re-simplifying on the way up
    pub fn subs(&self, replacements: &HashMap<Symbol, Expr>) -> Expr {
        match self {
            Expr::Int(v) => Expr::Int(*v),
            Expr::Symbol(s) => replacements.get(s).cloned().unwrap_or_else(|| self.clone()),
            Expr::Add(items) => Expr::sum(items.iter().map(|e| e.subs(replacements))),
            Expr::Mul(items) => Expr::product(items.iter().map(|e| e.subs(replacements))),
            Expr::Pow(base, e) => Expr::pow(base.subs(replacements), *e),
            Expr::FloorDiv(a, b) => Expr::floor_div(a.subs(replacements), b.subs(replacements)),
            Expr::ModularIndexing(a, b, c) => Expr::modular_indexing(
                a.subs(replacements),
                b.subs(replacements),
                c.subs(replacements),
            ),
        }
    }

    /// Evaluate numerically, looking symbols up through `lookup`.
    ///
    /// Returns `None` when a symbol has no value or the result is NaN.
    pub fn evaluate(&self, lookup: &dyn Fn(&Symbol) -> Option<Scalar>) -> Option<Scalar> {
        let value = match self {
            Expr::Int(v) => Scalar::Int(*v),
            Expr::Symbol(s) => lookup(s)?,
            Expr::Add(items) => {
                let mut acc = Scalar::Int(0);
                for item in items {
                    acc = acc.add(item.evaluate(lookup)?);
                }
                acc
            }
            Expr::Mul(items) => {
                let mut acc = Scalar::Int(1);
                for item in items {
                    acc = acc.mul(item.evaluate(lookup)?);
                }
                acc
            }
            Expr::Pow(base, e) => base.evaluate(lookup)?.pow(Scalar::Int(i64::from(*e))),
            Expr::FloorDiv(a, b) => a.evaluate(lookup)?.floor_div(b.evaluate(lookup)?),
            Expr::ModularIndexing(a, b, c) => a
                .evaluate(lookup)?
                .floor_div(b.evaluate(lookup)?)
                .modulo(c.evaluate(lookup)?),
        };
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }

    /// Continuous relaxation used before differentiating.
    ///
    /// `FloorDiv(x, y)` becomes `x / y`. `ModularIndexing(x, y, z)` becomes
    /// `x / y` when `z` is a constant; otherwise it is kept (and is then not
    /// differentiable in any symbol it contains).
    pub fn relax_index_ops(&self) -> Expr {
        match self {
            Expr::Int(_) | Expr::Symbol(_) => self.clone(),
            Expr::Add(items) => Expr::sum(items.iter().map(Expr::relax_index_ops)),
            Expr::Mul(items) => Expr::product(items.iter().map(Expr::relax_index_ops)),
            Expr::Pow(base, e) => Expr::pow(base.relax_index_ops(), *e),
            Expr::FloorDiv(a, b) => {
                Expr::product([a.relax_index_ops(), Expr::pow(b.relax_index_ops(), -1)])
            }
            Expr::ModularIndexing(a, b, c) => {
                let ratio = Expr::product([a.relax_index_ops(), Expr::pow(b.relax_index_ops(), -1)]);
                if c.is_constant() {
                    ratio
                } else {
                    Expr::ModularIndexing(Box::new(ratio), Box::new(Expr::Int(1)), c.clone())
                }
            }
        }
    }

    /// Partial derivative with respect to `symbol`.
    ///
    /// `None` when the expression contains a floor/modulo construct that
    /// depends on `symbol`; callers should relax those first.
    pub fn diff(&self, symbol: &Symbol) -> Option<Expr> {
        if !self.contains_symbol(symbol) {
            return Some(Expr::Int(0));
        }
        match self {
            Expr::Int(_) => Some(Expr::Int(0)),
            Expr::Symbol(s) => Some(Expr::Int(i64::from(s == symbol))),
            Expr::Add(items) => {
                let terms = items.iter().map(|e| e.diff(symbol)).collect::<Option<Vec<_>>>()?;
                Some(Expr::sum(terms))
            }
            Expr::Mul(items) => {
                // product rule
                let mut terms = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let d = item.diff(symbol)?;
                    if d == Expr::Int(0) {
                        continue;
                    }
                    let others = items
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, e)| e.clone());
                    terms.push(Expr::product(std::iter::once(d).chain(others)));
                }
                Some(Expr::sum(terms))
            }
            Expr::Pow(base, e) => {
                let d = base.diff(symbol)?;
                Some(Expr::product([
                    Expr::Int(i64::from(*e)),
                    Expr::pow((**base).clone(), e.checked_sub(1)?),
                    d,
                ]))
            }
            Expr::FloorDiv(..) | Expr::ModularIndexing(..) => None,
        }
    }

    /// Sign information derivable from the positive-symbol assumption
    pub fn sign(&self) -> Sign {
        self.sign_with(&|_| Sign::POSITIVE)
    }

    /// Sign information given the possible signs of each symbol
    pub fn sign_with(&self, symbol_sign: &dyn Fn(&Symbol) -> Sign) -> Sign {
        let sign = |e: &Expr| e.sign_with(symbol_sign);
        match self {
            Expr::Int(v) => Sign::of_int(*v),
            Expr::Symbol(s) => symbol_sign(s),
            Expr::Add(items) => items.iter().map(sign).fold(Sign::ZERO, Sign::add),
            Expr::Mul(items) => items.iter().map(sign).fold(Sign::POSITIVE, Sign::mul),
            Expr::Pow(base, e) => sign(base).pow(*e),
            Expr::FloorDiv(a, b) => {
                if sign(a).is_nonnegative() && sign(b).is_positive() {
                    Sign::NONNEGATIVE
                } else {
                    Sign::UNKNOWN
                }
            }
            Expr::ModularIndexing(_, _, m) => {
                if sign(m).is_positive() {
                    Sign::NONNEGATIVE
                } else {
                    Sign::UNKNOWN
                }
            }
        }
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Int(v)
    }
}

impl From<Symbol> for Expr {
    fn from(s: Symbol) -> Self {
        Expr::Symbol(s)
    }
}

impl ops::Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::sum([self, rhs])
    }
}

impl ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum([self, Expr::product([Expr::Int(-1), rhs])])
    }
}

impl ops::Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::product([self, rhs])
    }
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::product([Expr::Int(-1), self])
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{}", v),
            Expr::Symbol(s) => write!(f, "{}", s),
            Expr::Add(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" + ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Expr::Mul(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str("*")?;
                    }
                    if matches!(item, Expr::Add(_)) {
                        write!(f, "({})", item)?;
                    } else {
                        write!(f, "{}", item)?;
                    }
                }
                Ok(())
            }
            Expr::Pow(base, e) => match **base {
                Expr::Int(_) | Expr::Symbol(_) => write!(f, "{}**{}", base, e),
                _ => write!(f, "({})**{}", base, e),
            },
            Expr::FloorDiv(a, b) => write!(f, "FloorDiv({}, {})", a, b),
            Expr::ModularIndexing(a, b, c) => write!(f, "ModularIndexing({}, {}, {})", a, b, c),
        }
    }
}

/// Set of signs an expression may take, over {negative, zero, positive}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sign(u8);

impl Sign {
    const NEG: u8 = 0b001;
    const ZER: u8 = 0b010;
    const POS: u8 = 0b100;

    pub const NEGATIVE: Sign = Sign(Self::NEG);
    pub const ZERO: Sign = Sign(Self::ZER);
    pub const POSITIVE: Sign = Sign(Self::POS);
    pub const NONNEGATIVE: Sign = Sign(Self::ZER | Self::POS);
    pub const NONPOSITIVE: Sign = Sign(Self::NEG | Self::ZER);
    pub const UNKNOWN: Sign = Sign(Self::NEG | Self::ZER | Self::POS);

    fn of_int(v: i64) -> Sign {
        match v.signum() {
            1 => Sign::POSITIVE,
            -1 => Sign::NEGATIVE,
            _ => Sign::ZERO,
        }
    }

    pub fn is_positive(self) -> bool {
        self == Sign::POSITIVE
    }

    /// Provably `<= 0`
    pub fn is_nonpositive(self) -> bool {
        self.0 & Self::POS == 0
    }

    /// Provably `>= 0`
    pub fn is_nonnegative(self) -> bool {
        self.0 & Self::NEG == 0
    }

    pub fn is_unknown(self) -> bool {
        self == Sign::UNKNOWN
    }

    fn add(self, other: Sign) -> Sign {
        if self == Sign::ZERO {
            return other;
        }
        if other == Sign::ZERO {
            return self;
        }
        if self.is_nonnegative() && other.is_nonnegative() {
            let mut bits = 0;
            if (self.0 | other.0) & Self::POS != 0 {
                bits |= Self::POS;
            }
            if self.0 & other.0 & Self::ZER != 0 {
                bits |= Self::ZER;
            }
            return Sign(bits);
        }
        if self.is_nonpositive() && other.is_nonpositive() {
            let mut bits = 0;
            if (self.0 | other.0) & Self::NEG != 0 {
                bits |= Self::NEG;
            }
            if self.0 & other.0 & Self::ZER != 0 {
                bits |= Self::ZER;
            }
            return Sign(bits);
        }
        Sign::UNKNOWN
    }

    fn mul(self, other: Sign) -> Sign {
        let mut bits = 0;
        for a in [Self::NEG, Self::ZER, Self::POS] {
            if self.0 & a == 0 {
                continue;
            }
            for b in [Self::NEG, Self::ZER, Self::POS] {
                if other.0 & b == 0 {
                    continue;
                }
                bits |= match (a, b) {
                    (Self::ZER, _) | (_, Self::ZER) => Self::ZER,
                    (x, y) if x == y => Self::POS,
                    _ => Self::NEG,
                };
            }
        }
        Sign(bits)
    }

    fn pow(self, exponent: i32) -> Sign {
        if exponent == 0 {
            return Sign::POSITIVE;
        }
        if exponent < 0 && self.0 & Self::ZER != 0 {
            return Sign::UNKNOWN;
        }
        if exponent % 2 == 0 {
            let mut bits = 0;
            if self.0 & (Self::NEG | Self::POS) != 0 {
                bits |= Self::POS;
            }
            if self.0 & Self::ZER != 0 {
                bits |= Self::ZER;
            }
            Sign(bits)
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::symbol("x")
    }

    fn y() -> Expr {
        Expr::symbol("y")
    }

    #[test]
    fn test_constructors_fold_constants() {
        assert_eq!(Expr::int(2) + Expr::int(3), Expr::Int(5));
        assert_eq!(x() * Expr::int(0), Expr::Int(0));
        assert_eq!(x() * Expr::int(1), x());
        assert_eq!(x() + Expr::int(0), x());
        assert_eq!(Expr::floor_div(Expr::int(7), Expr::int(2)), Expr::Int(3));
        assert_eq!(
            Expr::modular_indexing(Expr::int(130), Expr::int(2), Expr::int(64)),
            Expr::Int(1)
        );
    }

    #[test]
    fn test_free_symbols_sorted() {
        let e = y() * Expr::int(3) + x();
        let names: Vec<_> = e.free_symbols().into_iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn test_subs_replaces_and_folds() {
        let e = x() * Expr::int(4) + y();
        let mut map = HashMap::new();
        map.insert(Symbol::new("x"), Expr::int(2));
        map.insert(Symbol::new("y"), Expr::symbol("z"));
        assert_eq!(e.subs(&map), Expr::int(8) + Expr::symbol("z"));
    }

    #[test]
    fn test_evaluate_index_ops() {
        let e = Expr::modular_indexing(x(), Expr::int(2), Expr::int(8)) + Expr::floor_div(y(), Expr::int(3));
        let value = e.evaluate(&|s: &Symbol| match s.name() {
            "x" => Some(Scalar::Int(21)),
            "y" => Some(Scalar::Int(10)),
            _ => None,
        });
        // (21 // 2) % 8 = 2, 10 // 3 = 3
        assert_eq!(value, Some(Scalar::Int(5)));
    }

    #[test]
    fn test_evaluate_missing_symbol() {
        assert_eq!(x().evaluate(&|_: &Symbol| None), None);
    }

    #[test]
    fn test_diff_linear() {
        let e = x() * Expr::int(4) + y() * Expr::int(-2) + Expr::int(7);
        assert_eq!(e.diff(&Symbol::new("x")), Some(Expr::Int(4)));
        assert_eq!(e.diff(&Symbol::new("y")), Some(Expr::Int(-2)));
    }

    #[test]
    fn test_diff_product_and_power() {
        let e = x() * y();
        assert_eq!(e.diff(&Symbol::new("x")), Some(y()));
        let sq = Expr::pow(x(), 2);
        assert_eq!(sq.diff(&Symbol::new("x")), Some(Expr::int(2) * x()));
    }

    #[test]
    fn test_diff_rejects_floor_constructs() {
        let e = Expr::floor_div(x(), Expr::int(4));
        assert_eq!(e.diff(&Symbol::new("x")), None);
        assert_eq!(e.diff(&Symbol::new("y")), Some(Expr::Int(0)));
    }

    #[test]
    fn test_relax_index_ops() {
        let e = Expr::floor_div(x(), Expr::int(4));
        let relaxed = e.relax_index_ops();
        assert_eq!(relaxed, x() * Expr::pow(Expr::int(4), -1));
        assert!(relaxed.diff(&Symbol::new("x")).is_some_and(|d| d.sign().is_positive()));

        let m = Expr::modular_indexing(x(), Expr::int(1), y());
        assert!(m.relax_index_ops().diff(&Symbol::new("x")).is_none());
    }

    #[test]
    fn test_sign_rules() {
        assert!(x().sign().is_positive());
        assert!((x() * y() + Expr::int(3)).sign().is_positive());
        assert!((-x()).sign().is_nonpositive());
        assert!((x() - y()).sign().is_unknown());
        assert!(Expr::pow(-x(), 2).sign().is_positive());
        assert!(Expr::int(0).sign().is_nonpositive());
        assert!(Expr::floor_div(x(), Expr::int(2)).sign().is_nonnegative());
    }

    #[test]
    fn test_sign_with_symbol_signs() {
        let nonpositive = |s: &Symbol| {
            if s.name() == "y" {
                Sign::NONPOSITIVE
            } else {
                Sign::POSITIVE
            }
        };
        assert!((x() * y()).sign_with(&nonpositive).is_nonpositive());
        assert!((x() * y() * Expr::int(1000) + Expr::int(1)).sign_with(&nonpositive).is_unknown());
        assert!(Expr::pow(y(), 2).sign_with(&nonpositive).is_nonnegative());
    }

    #[test]
    fn test_diff_pow_with_extreme_exponent() {
        let e = Expr::Pow(Box::new(x()), i32::MIN);
        assert_eq!(e.diff(&Symbol::new("x")), None);
    }

    #[test]
    fn test_display() {
        let e = x() * Expr::int(4) + Expr::modular_indexing(y(), Expr::int(1), Expr::int(64));
        assert_eq!(e.to_string(), "4*x + ModularIndexing(y, 1, 64)");
    }
}

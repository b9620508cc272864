//! Interval lattice for value-range analysis
//!
//! A `ValueRange` is a closed interval `[lower, upper]` of scalars:
//! - Top (⊤) = `[-inf, +inf]`, the range we fall back to whenever a bound is unclear
//! - A constant `c` = `[c, c]`
//! - Booleans use `[false, true]`
//!
//! Every combinator returns a superset of the true output set for inputs
//! drawn from its argument ranges, provided the mapped function has the
//! monotonicity the combinator assumes. A bound that evaluates to NaN is
//! widened to the matching infinity so that it never leaks into comparisons.

use loopidx_ir::interp::Operand;
use loopidx_ir::Scalar;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A closed interval of scalars
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub lower: Scalar,
    pub upper: Scalar,
}

impl ValueRange {
    /// Build a range, widening NaN bounds (lower → -inf, upper → +inf)
    pub fn new(lower: impl Into<Scalar>, upper: impl Into<Scalar>) -> Self {
        let (lower, upper) = (lower.into(), upper.into());
        Self {
            lower: if lower.is_nan() { Scalar::NEG_INFINITY } else { lower },
            upper: if upper.is_nan() { Scalar::INFINITY } else { upper },
        }
    }

    /// Degenerate range `[v, v]`
    pub fn singleton(v: impl Into<Scalar>) -> Self {
        let v = v.into();
        Self::new(v, v)
    }

    /// Top element: `[-inf, +inf]`
    pub fn unbounded() -> Self {
        Self::new(Scalar::NEG_INFINITY, Scalar::INFINITY)
    }

    /// Both boolean values
    pub fn unbounded_bool() -> Self {
        Self::new(false, true)
    }

    /// Lift an operand to a range.
    ///
    /// Ranges pass through and scalar literals become degenerate ranges.
    /// Dtype and name operands have no range: `None`.
    pub fn wrap(operand: &Operand<'_, ValueRange>) -> Option<Self> {
        match operand {
            Operand::Value(range) => Some(*range),
            Operand::Scalar(v) => Some(Self::singleton(*v)),
            Operand::Dtype(_) | Operand::Name(_) => None,
        }
    }

    /// Lower and upper bound are the same value
    pub fn is_singleton(&self) -> bool {
        self.lower.compare(&self.upper) == Some(Ordering::Equal)
    }

    /// Both bounds are booleans
    pub fn is_bool(&self) -> bool {
        self.lower.is_bool() && self.upper.is_bool()
    }

    /// Map both bounds with a non-decreasing `f`
    pub fn unary_map(self, f: impl Fn(Scalar) -> Scalar) -> Self {
        Self::new(f(self.lower), f(self.upper))
    }

    /// Map both bounds with a monotone `f` (either direction), then order them
    pub fn checked_unary_map(self, f: impl Fn(Scalar) -> Scalar) -> Self {
        let (a, b) = (f(self.lower), f(self.upper));
        Self::new(Scalar::min_of(a, b), Scalar::max_of(a, b))
    }

    /// Pair lower with lower and upper with upper; `f` non-decreasing in both arguments
    pub fn binary_map(self, other: ValueRange, f: impl Fn(Scalar, Scalar) -> Scalar) -> Self {
        Self::new(f(self.lower, other.lower), f(self.upper, other.upper))
    }

    /// Evaluate `f` at all four corners and take (min, max)
    pub fn binary_map_products(self, other: ValueRange, f: impl Fn(Scalar, Scalar) -> Scalar) -> Self {
        let corners = [
            f(self.lower, other.lower),
            f(self.lower, other.upper),
            f(self.upper, other.lower),
            f(self.upper, other.upper),
        ];
        // NaN corners propagate through min_of/max_of and widen to infinity
        let lower = corners.iter().copied().reduce(Scalar::min_of).unwrap_or(Scalar::NEG_INFINITY);
        let upper = corners.iter().copied().reduce(Scalar::max_of).unwrap_or(Scalar::INFINITY);
        Self::new(lower, upper)
    }

    /// Join (least upper bound): the hull of both ranges
    pub fn join(&self, other: &ValueRange) -> ValueRange {
        Self::new(
            Scalar::min_of(self.lower, other.lower),
            Scalar::max_of(self.upper, other.upper),
        )
    }

    /// `lower <= v <= upper`; false when NaN is involved
    pub fn contains(&self, v: Scalar) -> bool {
        let above = matches!(self.lower.compare(&v), Some(Ordering::Less | Ordering::Equal));
        let below = matches!(v.compare(&self.upper), Some(Ordering::Less | Ordering::Equal));
        above && below
    }

    /// Zero lies inside the range, bounds included
    pub fn contains_zero(&self) -> bool {
        self.contains(Scalar::Int(0))
    }

    /// Strictly negative lower bound and strictly positive upper bound
    pub fn straddles_zero(&self) -> bool {
        self.lower.compare(&Scalar::Int(0)) == Some(Ordering::Less)
            && self.upper.compare(&Scalar::Int(0)) == Some(Ordering::Greater)
    }

    /// Lower bound is at least zero
    pub fn is_nonnegative(&self) -> bool {
        matches!(self.lower.compare(&Scalar::Int(0)), Some(Ordering::Greater | Ordering::Equal))
    }

    /// Either bound is an infinity
    pub fn has_infinite_bound(&self) -> bool {
        self.lower.is_infinite() || self.upper.is_infinite()
    }
}

impl Default for ValueRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl From<Scalar> for ValueRange {
    fn from(v: Scalar) -> Self {
        Self::singleton(v)
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopidx_ir::Dtype;
    use proptest::prelude::*;

    fn int_range() -> impl Strategy<Value = (i64, i64)> {
        (-1000i64..1000, 0i64..500).prop_map(|(lo, width)| (lo, lo + width))
    }

    fn sample(lo: i64, hi: i64, t: f64) -> i64 {
        lo + ((hi - lo) as f64 * t).round() as i64
    }

    #[test]
    fn test_nan_bounds_widen() {
        let r = ValueRange::new(f64::NAN, f64::NAN);
        assert_eq!(r, ValueRange::unbounded());
        assert!(r.has_infinite_bound());
    }

    #[test]
    fn test_wrap_operands() {
        let r = ValueRange::new(0i64, 3i64);
        assert_eq!(ValueRange::wrap(&Operand::Value(r)), Some(r));
        assert_eq!(
            ValueRange::wrap(&Operand::Scalar(Scalar::Int(7))),
            Some(ValueRange::singleton(7i64))
        );
        assert_eq!(ValueRange::wrap(&Operand::Dtype(Dtype::Int64)), None);
        assert_eq!(ValueRange::wrap(&Operand::Name("in_ptr0")), None);
    }

    #[test]
    fn test_join_is_hull() {
        let a = ValueRange::new(0i64, 4i64);
        let b = ValueRange::new(-2i64, 1i64);
        assert_eq!(a.join(&b), ValueRange::new(-2i64, 4i64));
        assert_eq!(a.join(&ValueRange::unbounded()), ValueRange::unbounded());
    }

    #[test]
    fn test_zero_queries() {
        assert!(ValueRange::new(-1i64, 1i64).straddles_zero());
        assert!(!ValueRange::new(0i64, 1i64).straddles_zero());
        assert!(ValueRange::new(0i64, 1i64).contains_zero());
        assert!(!ValueRange::new(1i64, 5i64).contains_zero());
        assert!(ValueRange::unbounded().contains_zero());
    }

    #[test]
    fn test_bool_range() {
        let b = ValueRange::unbounded_bool();
        assert!(b.is_bool());
        assert!(b.contains(Scalar::Bool(true)));
        assert!(!b.is_singleton());
    }

    #[test]
    fn test_display() {
        assert_eq!(ValueRange::new(0i64, 396i64).to_string(), "[0, 396]");
        assert_eq!(ValueRange::unbounded().to_string(), "[-inf, inf]");
    }

    proptest! {
        #[test]
        fn prop_singleton_combinators_stay_singleton(v in -10_000i64..10_000, w in -100i64..100) {
            let (r, s) = (ValueRange::singleton(v), ValueRange::singleton(w));
            prop_assert!(r.is_singleton());
            prop_assert_eq!(r.checked_unary_map(Scalar::neg), ValueRange::singleton(-v));
            prop_assert_eq!(r.binary_map(s, Scalar::add), ValueRange::singleton(v + w));
            prop_assert_eq!(r.binary_map_products(s, Scalar::mul), ValueRange::singleton(v * w));
        }

        #[test]
        fn prop_checked_unary_map_contains_neg(
            (lo, hi) in int_range(),
            t in 0.0f64..=1.0,
        ) {
            let x = sample(lo, hi, t);
            let out = ValueRange::new(lo, hi).checked_unary_map(Scalar::neg);
            prop_assert!(out.contains(Scalar::Int(-x)));
        }

        #[test]
        fn prop_binary_map_contains_sum(
            (alo, ahi) in int_range(),
            (blo, bhi) in int_range(),
            s in 0.0f64..=1.0,
            t in 0.0f64..=1.0,
        ) {
            let (x, y) = (sample(alo, ahi, s), sample(blo, bhi, t));
            let out = ValueRange::new(alo, ahi).binary_map(ValueRange::new(blo, bhi), Scalar::add);
            prop_assert!(out.contains(Scalar::Int(x + y)));
        }

        #[test]
        fn prop_binary_map_products_contains_product(
            (alo, ahi) in int_range(),
            (blo, bhi) in int_range(),
            s in 0.0f64..=1.0,
            t in 0.0f64..=1.0,
        ) {
            let (x, y) = (sample(alo, ahi, s), sample(blo, bhi, t));
            let out = ValueRange::new(alo, ahi).binary_map_products(ValueRange::new(blo, bhi), Scalar::mul);
            prop_assert!(out.contains(Scalar::Int(x * y)));
        }

        #[test]
        fn prop_join_contains_both(
            (alo, ahi) in int_range(),
            (blo, bhi) in int_range(),
        ) {
            let (a, b) = (ValueRange::new(alo, ahi), ValueRange::new(blo, bhi));
            let j = a.join(&b);
            for v in [alo, ahi, blo, bhi] {
                prop_assert!(j.contains(Scalar::Int(v)));
            }
        }
    }
}

//! Scalar values carried by loop-body graphs and range bounds
//!
//! Integers use checked `i64` arithmetic. When an integer operation would
//! overflow, the result is promoted to `Float` so that large magnitudes stay
//! large instead of wrapping. Infinity is represented as `Float(±inf)`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A concrete numeric or boolean value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub const INFINITY: Scalar = Scalar::Float(f64::INFINITY);
    pub const NEG_INFINITY: Scalar = Scalar::Float(f64::NEG_INFINITY);

    pub fn is_bool(&self) -> bool {
        matches!(self, Scalar::Bool(_))
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Scalar::Float(f) if f.is_nan())
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Scalar::Float(f) if f.is_infinite())
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Scalar::Bool(b) => f64::from(u8::from(b)),
            Scalar::Int(i) => i as f64,
            Scalar::Float(f) => f,
        }
    }

    /// Bools become integers; everything else is unchanged.
    fn promote(self) -> Scalar {
        match self {
            Scalar::Bool(b) => Scalar::Int(i64::from(b)),
            other => other,
        }
    }

    /// Python-style `int(x)`: truncate toward zero.
    ///
    /// Infinite and NaN floats are returned unchanged, and finite floats
    /// outside the `i64` range stay floats (already truncated).
    pub fn truncate(self) -> Scalar {
        match self.promote() {
            Scalar::Float(f) if f.is_finite() => {
                let t = f.trunc();
                if t >= i64::MIN as f64 && t < i64::MAX as f64 {
                    Scalar::Int(t as i64)
                } else {
                    Scalar::Float(t)
                }
            }
            other => other,
        }
    }

    /// Numeric ordering; `None` when either side is NaN.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self.promote(), other.promote()) {
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }

    /// Smaller of two scalars, NaN-propagating.
    pub fn min_of(a: Scalar, b: Scalar) -> Scalar {
        match a.compare(&b) {
            Some(Ordering::Greater) => b,
            Some(_) => a,
            None => Scalar::Float(f64::NAN),
        }
    }

    /// Larger of two scalars, NaN-propagating.
    pub fn max_of(a: Scalar, b: Scalar) -> Scalar {
        match a.compare(&b) {
            Some(Ordering::Less) => b,
            Some(_) => a,
            None => Scalar::Float(f64::NAN),
        }
    }

    /// Checked addition, promoting to float on overflow
    pub fn add(self, rhs: Scalar) -> Scalar {
        int_or_float(self, rhs, i64::checked_add, |a, b| a + b)
    }

    /// Checked subtraction, promoting to float on overflow
    pub fn sub(self, rhs: Scalar) -> Scalar {
        int_or_float(self, rhs, i64::checked_sub, |a, b| a - b)
    }

    /// Checked multiplication, promoting to float on overflow
    pub fn mul(self, rhs: Scalar) -> Scalar {
        int_or_float(self, rhs, i64::checked_mul, |a, b| a * b)
    }

    /// True division; always produces a float.
    pub fn true_div(self, rhs: Scalar) -> Scalar {
        Scalar::Float(self.as_f64() / rhs.as_f64())
    }

    /// Floor division (rounds toward negative infinity).
    pub fn floor_div(self, rhs: Scalar) -> Scalar {
        match (self.promote(), rhs.promote()) {
            (Scalar::Int(a), Scalar::Int(b)) if b != 0 => match a.checked_div(b) {
                Some(q) if a % b != 0 && ((a < 0) != (b < 0)) => Scalar::Int(q - 1),
                Some(q) => Scalar::Int(q),
                None => Scalar::Float((a as f64 / b as f64).floor()),
            },
            (a, b) => Scalar::Float((a.as_f64() / b.as_f64()).floor()),
        }
    }

    /// Remainder with the sign of the divisor (Python `%`).
    pub fn modulo(self, rhs: Scalar) -> Scalar {
        match (self.promote(), rhs.promote()) {
            (Scalar::Int(a), Scalar::Int(b)) if b != 0 => match a.checked_rem(b) {
                Some(r) if r != 0 && ((r < 0) != (b < 0)) => Scalar::Int(r + b),
                Some(r) => Scalar::Int(r),
                None => Scalar::Int(0),
            },
            (a, b) => {
                let (x, y) = (a.as_f64(), b.as_f64());
                let r = x % y;
                if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                    Scalar::Float(r + y)
                } else {
                    Scalar::Float(r)
                }
            }
        }
    }

    /// Exact for non-negative integer exponents that do not overflow
    pub fn pow(self, rhs: Scalar) -> Scalar {
        match (self.promote(), rhs.promote()) {
            (Scalar::Int(a), Scalar::Int(b)) if b >= 0 => u32::try_from(b)
                .ok()
                .and_then(|e| a.checked_pow(e))
                .map(Scalar::Int)
                .unwrap_or_else(|| Scalar::Float((a as f64).powf(b as f64))),
            (a, b) => Scalar::Float(a.as_f64().powf(b.as_f64())),
        }
    }

    /// Negation; `-i64::MIN` becomes a float
    pub fn neg(self) -> Scalar {
        match self.promote() {
            Scalar::Int(a) => a
                .checked_neg()
                .map(Scalar::Int)
                .unwrap_or(Scalar::Float(-(a as f64))),
            other => Scalar::Float(-other.as_f64()),
        }
    }

    /// Absolute value; `|i64::MIN|` becomes a float
    pub fn abs(self) -> Scalar {
        match self.promote() {
            Scalar::Int(a) => a
                .checked_abs()
                .map(Scalar::Int)
                .unwrap_or(Scalar::Float((a as f64).abs())),
            other => Scalar::Float(other.as_f64().abs()),
        }
    }

    /// Round toward negative infinity
    pub fn floor(self) -> Scalar {
        self.round_with(f64::floor)
    }

    /// Round toward positive infinity
    pub fn ceil(self) -> Scalar {
        self.round_with(f64::ceil)
    }

    /// Apply a float rounding function, keeping integers exact.
    pub fn round_with(self, f: fn(f64) -> f64) -> Scalar {
        match self.promote() {
            Scalar::Int(a) => Scalar::Int(a),
            other => Scalar::Float(f(other.as_f64())).truncate_if_finite(),
        }
    }

    fn truncate_if_finite(self) -> Scalar {
        if self.is_infinite() || self.is_nan() {
            self
        } else {
            self.truncate()
        }
    }

    /// Apply a float function to the value, producing a float.
    pub fn map_float(self, f: impl Fn(f64) -> f64) -> Scalar {
        Scalar::Float(f(self.as_f64()))
    }
}

fn int_or_float(
    lhs: Scalar,
    rhs: Scalar,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Scalar {
    match (lhs.promote(), rhs.promote()) {
        (Scalar::Int(a), Scalar::Int(b)) => int_op(a, b)
            .map(Scalar::Int)
            .unwrap_or_else(|| Scalar::Float(float_op(a as f64, b as f64))),
        (a, b) => Scalar::Float(float_op(a.as_f64(), b.as_f64())),
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<i32> for Scalar {
    fn from(i: i32) -> Self {
        Scalar::Int(i64::from(i))
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(v) if v.is_infinite() => {
                write!(f, "{}", if *v > 0.0 { "inf" } else { "-inf" })
            }
            Scalar::Float(v) => write!(f, "{:?}", v),
        }
    }
}

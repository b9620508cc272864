//! Transfer functions for value-range analysis
//!
//! `ValueRangeAnalysis` is the `OpsHandler` the narrowing engine plugs into
//! the loop-body interpreter. Each opcode maps to a transfer function over
//! [`ValueRange`]; anything outside the table falls back to the unbounded
//! range with a diagnostic.
//!
//! Several functions carry guards the bare combinators would miss: division
//! and modulo by a range containing zero, `abs`/`square` across zero, `pow`
//! with a possibly negative base.

use crate::config::NarrowingConfig;
use crate::lattice::ValueRange;
use loopidx_ir::graph::{BinaryOp, Dtype, Opcode, UnaryOp};
use loopidx_ir::interp::{Operand, OpsHandler};
use loopidx_ir::{IrError, Scalar};
use tracing::{debug, warn};

/// Interval semantics for every opcode in the loop-body vocabulary
#[derive(Debug, Clone)]
pub struct ValueRangeAnalysis {
    warn_on_unhandled_ops: bool,
}

impl ValueRangeAnalysis {
    pub fn new() -> Self {
        Self {
            warn_on_unhandled_ops: true,
        }
    }

    pub fn from_config(config: &NarrowingConfig) -> Self {
        Self {
            warn_on_unhandled_ops: config.warn_on_unhandled_ops,
        }
    }

    /// Comparisons and logical ops: either boolean value
    pub fn bool_handler() -> ValueRange {
        ValueRange::unbounded_bool()
    }

    /// Fallback for opcodes without a transfer function
    pub fn default_handler(&self, opcode: &Opcode) -> ValueRange {
        if self.warn_on_unhandled_ops {
            warn!(op = %opcode, "unhandled value range op");
        } else {
            debug!(op = %opcode, "unhandled value range op");
        }
        ValueRange::unbounded()
    }

    /// Bool ranges become `{0, 1}` in the target type; anything else passes
    /// through, since precision is decided by the narrowing engine.
    pub fn to_dtype(x: ValueRange, dtype: Dtype) -> ValueRange {
        if !x.is_bool() {
            return x;
        }
        if dtype.is_floating_point() {
            ValueRange::new(0.0, 1.0)
        } else {
            ValueRange::new(0i64, 1i64)
        }
    }

    pub fn constant(value: Scalar) -> ValueRange {
        if value.is_nan() {
            ValueRange::unbounded()
        } else {
            ValueRange::singleton(value)
        }
    }

    pub fn unary(op: UnaryOp, x: ValueRange) -> ValueRange {
        match op {
            UnaryOp::Reciprocal => {
                if x.contains_zero() {
                    return ValueRange::unbounded();
                }
                x.checked_unary_map(|y| Scalar::Int(1).true_div(y))
            }
            UnaryOp::Neg => x.checked_unary_map(Scalar::neg),
            UnaryOp::Abs => {
                if x.straddles_zero() {
                    ValueRange::new(Scalar::Int(0), Scalar::max_of(x.lower.abs(), x.upper.abs()))
                } else {
                    x.checked_unary_map(Scalar::abs)
                }
            }
            UnaryOp::Square => {
                let square = |y: Scalar| y.mul(y);
                if x.straddles_zero() {
                    ValueRange::new(Scalar::Int(0), Scalar::max_of(square(x.lower), square(x.upper)))
                } else {
                    x.checked_unary_map(square)
                }
            }
            UnaryOp::Sqrt => x.unary_map(|y| y.map_float(f64::sqrt)),
            UnaryOp::Exp => x.unary_map(|y| y.map_float(f64::exp)),
            UnaryOp::Log => x.checked_unary_map(|y| {
                if y.as_f64() <= 0.0 {
                    Scalar::NEG_INFINITY
                } else {
                    y.map_float(f64::ln)
                }
            }),
            UnaryOp::Floor => x.unary_map(Scalar::floor),
            UnaryOp::Ceil => x.unary_map(Scalar::ceil),
            UnaryOp::Trunc => x.unary_map(|y| y.round_with(f64::trunc)),
            UnaryOp::Round => x.unary_map(|y| y.round_with(f64::round_ties_even)),
            UnaryOp::Relu => x.unary_map(|y| Scalar::max_of(Scalar::Int(0), y)),
            UnaryOp::Sigmoid => x.unary_map(|y| y.map_float(|v| 1.0 / (1.0 + (-v).exp()))),
            UnaryOp::Tanh => x.unary_map(|y| y.map_float(f64::tanh)),
            UnaryOp::Sin => Self::periodic(x, f64::sin),
            UnaryOp::Cos => Self::periodic(x, f64::cos),
        }
    }

    /// Exact on a single point, `[-1, 1]` for any wider range
    fn periodic(x: ValueRange, f: fn(f64) -> f64) -> ValueRange {
        if x.is_singleton() && !x.has_infinite_bound() {
            ValueRange::singleton(x.lower.map_float(f))
        } else {
            ValueRange::new(-1.0, 1.0)
        }
    }

    pub fn binary(op: BinaryOp, a: ValueRange, b: ValueRange) -> ValueRange {
        match op {
            BinaryOp::Add => a.binary_map(b, Scalar::add),
            BinaryOp::Sub => a.binary_map_products(b, Scalar::sub),
            BinaryOp::Mul => a.binary_map_products(b, Scalar::mul),
            BinaryOp::TrueDiv | BinaryOp::Div => {
                if b.contains_zero() {
                    return ValueRange::unbounded();
                }
                a.binary_map_products(b, Scalar::true_div)
            }
            BinaryOp::FloorDiv => {
                if b.contains_zero() {
                    return ValueRange::unbounded();
                }
                a.binary_map_products(b, Scalar::floor_div)
            }
            BinaryOp::Mod => Self::modulo(a, b),
            BinaryOp::Pow => Self::pow(a, b),
            BinaryOp::Minimum => a.binary_map(b, Scalar::min_of),
            BinaryOp::Maximum => a.binary_map(b, Scalar::max_of),
        }
    }

    /// Remainder takes the divisor's sign and is smaller than it in magnitude
    fn modulo(a: ValueRange, b: ValueRange) -> ValueRange {
        if b.contains_zero() {
            return ValueRange::unbounded();
        }
        if b.is_nonnegative() {
            // x % m <= x for non-negative x
            let upper = if a.is_nonnegative() {
                Scalar::min_of(a.upper, b.upper)
            } else {
                b.upper
            };
            ValueRange::new(Scalar::Int(0), upper)
        } else {
            ValueRange::new(b.lower, Scalar::Int(0))
        }
    }

    /// Corner evaluation is exact for a non-negative base; a negative base
    /// makes the sign depend on the exponent's parity.
    fn pow(a: ValueRange, b: ValueRange) -> ValueRange {
        let negative_exponent = b.lower.as_f64() < 0.0;
        let base_ok = a.is_nonnegative() && !(a.contains_zero() && negative_exponent);
        if base_ok || (a.is_singleton() && b.is_singleton()) {
            a.binary_map_products(b, Scalar::pow)
        } else {
            ValueRange::unbounded()
        }
    }

    /// `where(cond, a, b)`: hull of both branches
    pub fn select(a: ValueRange, b: ValueRange) -> ValueRange {
        a.join(&b)
    }
}

impl Default for ValueRangeAnalysis {
    fn default() -> Self {
        Self::new()
    }
}

impl OpsHandler for ValueRangeAnalysis {
    type Value = ValueRange;

    fn dispatch(
        &mut self,
        opcode: &Opcode,
        args: &[Operand<'_, ValueRange>],
    ) -> loopidx_ir::Result<Option<ValueRange>> {
        let range = match opcode {
            Opcode::Bool(_) => Self::bool_handler(),
            Opcode::Load | Opcode::Reduction => ValueRange::unbounded(),
            Opcode::Store => return Ok(None),
            Opcode::IndexExpr => range_arg(opcode, args, 0)?,
            Opcode::ToDtype => Self::to_dtype(range_arg(opcode, args, 0)?, dtype_arg(opcode, args, 1)?),
            Opcode::Constant => match args.first() {
                Some(Operand::Scalar(v)) => Self::constant(*v),
                _ => return Err(invalid(opcode, 0, "a scalar literal")),
            },
            Opcode::Unary(op) => Self::unary(*op, range_arg(opcode, args, 0)?),
            Opcode::Binary(op) => Self::binary(*op, range_arg(opcode, args, 0)?, range_arg(opcode, args, 1)?),
            Opcode::Where => Self::select(range_arg(opcode, args, 1)?, range_arg(opcode, args, 2)?),
            other => self.default_handler(other),
        };
        Ok(Some(range))
    }
}

fn range_arg(opcode: &Opcode, args: &[Operand<'_, ValueRange>], position: usize) -> loopidx_ir::Result<ValueRange> {
    args.get(position)
        .and_then(ValueRange::wrap)
        .ok_or_else(|| invalid(opcode, position, "a value or scalar"))
}

fn dtype_arg(opcode: &Opcode, args: &[Operand<'_, ValueRange>], position: usize) -> loopidx_ir::Result<Dtype> {
    match args.get(position) {
        Some(Operand::Dtype(dtype)) => Ok(*dtype),
        _ => Err(invalid(opcode, position, "a dtype")),
    }
}

fn invalid(opcode: &Opcode, position: usize, expected: &'static str) -> IrError {
    IrError::InvalidOperand {
        opcode: opcode.to_string(),
        position,
        expected,
    }
}

//! Narrowing pass configuration

use crate::error::Result;
use loopidx_ir::Dtype;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Knobs for the int64 → int32 narrowing pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrowingConfig {
    /// When false the pass records no decisions
    pub enabled: bool,
    /// Floats are 32-bit expressible when `|v| <= 2^float_mantissa_bits`
    pub float_mantissa_bits: u32,
    /// Cast targets that stop dominance traversal in addition to int32 and float types
    pub extra_skip_dtypes: Vec<Dtype>,
    /// Report unhandled opcodes at warn level instead of debug
    pub warn_on_unhandled_ops: bool,
}

impl NarrowingConfig {
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_float_mantissa_bits(mut self, bits: u32) -> Self {
        self.float_mantissa_bits = bits;
        self
    }

    pub fn with_skip_dtype(mut self, dtype: Dtype) -> Self {
        if !self.extra_skip_dtypes.contains(&dtype) {
            self.extra_skip_dtypes.push(dtype);
        }
        self
    }

    pub fn with_warn_on_unhandled_ops(mut self, warn: bool) -> Self {
        self.warn_on_unhandled_ops = warn;
        self
    }

    /// Largest float magnitude considered exactly representable
    pub fn float_limit(&self) -> f64 {
        2f64.powi(self.float_mantissa_bits.min(1023) as i32)
    }

    /// Whether a cast to `dtype` ends dominance traversal
    pub fn stops_traversal(&self, dtype: Dtype) -> bool {
        dtype == Dtype::Int32 || dtype.is_floating_point() || self.extra_skip_dtypes.contains(&dtype)
    }
}

impl Default for NarrowingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            float_mantissa_bits: 24,
            extra_skip_dtypes: Vec::new(),
            warn_on_unhandled_ops: true,
        }
    }
}

//! Error types for range analysis and narrowing

use loopidx_ir::{IrError, Symbol};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RangeError {
    #[error(transparent)]
    Ir(#[from] IrError),

    #[error("expected one index symbol per loop variable ({expected}), got {actual}")]
    LoopVarMismatch { expected: usize, actual: usize },

    #[error("index symbol '{0}' collides with a loop variable")]
    IndexSymbolCollision(Symbol),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RangeError>;

//! Narrowing decisions and per-candidate outcomes

use crate::lattice::ValueRange;
use loopidx_ir::{Dtype, NodeId};
use serde::Serialize;
use std::fmt;

/// Rewrite the target dtype of one `to_dtype` node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NarrowingDecision {
    pub node: NodeId,
    pub from: Dtype,
    pub to: Dtype,
}

/// Why a candidate keeps its int64 cast
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeepReason {
    /// A dominated value may fall outside 32-bit range
    NotExpressible { node: NodeId, range: ValueRange },
    /// An index expression fed by an indirect variable has an infinite bound
    IndirectIndexUnbounded { node: NodeId, index: String },
    /// An index expression fed by an indirect variable is too wide for int32
    IndirectIndexNotExpressible { node: NodeId, index: String, range: ValueRange },
    /// A dominated node never received a range (its block did not run)
    NoRange { node: NodeId },
}

impl fmt::Display for KeepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepReason::NotExpressible { node, range } => {
                write!(f, "{} has range {} outside int32", node, range)
            }
            KeepReason::IndirectIndexUnbounded { node, index } => {
                write!(f, "{} sets an indirect variable used by unbounded {}", node, index)
            }
            KeepReason::IndirectIndexNotExpressible { node, index, range } => write!(
                f,
                "{} sets an indirect variable making {} span {}",
                node, index, range
            ),
            KeepReason::NoRange { node } => write!(f, "{} has no computed range", node),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NarrowingOutcome {
    Narrowed,
    Kept { reason: KeepReason },
}

impl NarrowingOutcome {
    pub fn is_narrowed(&self) -> bool {
        matches!(self, NarrowingOutcome::Narrowed)
    }
}

/// One int64 cast considered by the pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateReport {
    pub node: NodeId,
    /// Size of the dominated set, including the candidate itself
    pub dominated: usize,
    #[serde(flatten)]
    pub outcome: NarrowingOutcome,
}

/// Everything one run of the pass decided
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NarrowingReport {
    pub candidates: Vec<CandidateReport>,
    pub decisions: Vec<NarrowingDecision>,
}

impl NarrowingReport {
    pub fn narrowed_count(&self) -> usize {
        self.decisions.len()
    }

    pub fn kept_count(&self) -> usize {
        self.candidates.len() - self.decisions.len()
    }

    pub fn is_narrowed(&self, node: NodeId) -> bool {
        self.decisions.iter().any(|d| d.node == node)
    }

    pub fn outcome(&self, node: NodeId) -> Option<&NarrowingOutcome> {
        self.candidates.iter().find(|c| c.node == node).map(|c| &c.outcome)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

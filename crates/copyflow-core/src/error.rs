//! Error types for copy analysis runs
//!
//! A run over a well-formed CFG never fails. Every variant here is either
//! malformed host input or an internal defect; both abort the run.

use crate::dataflow::BlockId;
use crate::entity::EntityId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CopyAnalysisError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CopyAnalysisError {
    #[error("block {block} is referenced but does not exist in the CFG")]
    UnknownBlock { block: BlockId },

    #[error("no edge from {from} to {to}")]
    UnknownEdge { from: BlockId, to: BlockId },

    #[error("predicate fact on edge {from} -> {to} references {entity}, which no operation or seed mentions")]
    UnknownEntity {
        entity: EntityId,
        from: BlockId,
        to: BlockId,
    },

    #[error("malformed CFG: {detail}")]
    MalformedCfg { detail: String },

    #[error("copy state invariant violated after {block}: {detail}")]
    InvariantViolation { block: BlockId, detail: String },

    #[error("fixpoint not reached after {limit} block visits (last visited {block}); transfer function is likely not monotone")]
    IterationLimitExceeded { limit: usize, block: BlockId },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CopyAnalysisError {
    /// Whether the error stems from the host's input rather than from the analysis itself
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CopyAnalysisError::UnknownBlock { .. }
                | CopyAnalysisError::UnknownEdge { .. }
                | CopyAnalysisError::UnknownEntity { .. }
                | CopyAnalysisError::MalformedCfg { .. }
                | CopyAnalysisError::Config(_)
        )
    }
}

impl From<serde_json::Error> for CopyAnalysisError {
    fn from(err: serde_json::Error) -> Self {
        CopyAnalysisError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_offender() {
        let err = CopyAnalysisError::UnknownEntity {
            entity: EntityId(7),
            from: BlockId(0),
            to: BlockId(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("e7"));
        assert!(msg.contains("bb0 -> bb2"));
    }

    #[test]
    fn test_input_error_classification() {
        assert!(CopyAnalysisError::UnknownBlock { block: BlockId(3) }.is_input_error());
        assert!(!CopyAnalysisError::IterationLimitExceeded {
            limit: 10,
            block: BlockId(1)
        }
        .is_input_error());
        assert!(!CopyAnalysisError::InvariantViolation {
            block: BlockId(1),
            detail: String::new()
        }
        .is_input_error());
    }
}

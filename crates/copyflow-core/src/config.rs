//! Analysis configuration

use crate::error::{CopyAnalysisError, Result};
use serde::{Deserialize, Serialize};

/// How member sets are combined when both predecessors know an entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    /// Any disagreement on members demotes the entity to `Unknown`
    #[default]
    Conservative,
    /// Keep the members both predecessors agree on
    Intersect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyAnalysisConfig {
    /// Cap on block visits; `None` derives a bound from the CFG size
    pub max_iterations: Option<usize>,
    pub merge_policy: MergePolicy,
    /// Check class-store invariants after every block visit
    pub verify_invariants: bool,
}

impl Default for CopyAnalysisConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            merge_policy: MergePolicy::Conservative,
            verify_invariants: cfg!(debug_assertions),
        }
    }
}

impl CopyAnalysisConfig {
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_iterations(mut self, limit: usize) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn with_invariant_checks(mut self, enabled: bool) -> Self {
        self.verify_invariants = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == Some(0) {
            return Err(CopyAnalysisError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Block-visit cap for a CFG of the given size.
    ///
    /// Each block's state can only weaken a bounded number of times per
    /// entity, so the derived bound scales with blocks times entities squared.
    pub fn iteration_limit(&self, blocks: usize, entities: usize) -> usize {
        self.max_iterations.unwrap_or_else(|| {
            let per_block = (entities + 2).saturating_mul(entities + 2);
            blocks.saturating_mul(per_block).max(64)
        })
    }
}

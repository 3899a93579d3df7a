//! High-level API for copy/alias equivalence analysis

use super::cfg::{BasicBlock, BlockId, Cfg, CfgEdge};
use super::lattice::{CopyAbstractValue, CopySemantics, CopyValueKind};
use super::solver::{BlockStatus, DataflowAnalysis, FixpointSolver};
use super::state::CopyState;
use super::transfer::{apply_block, apply_operation, refine_along_edge};
use crate::config::CopyAnalysisConfig;
use crate::entity::EntityId;
use crate::error::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Position in the CFG: before operation `index` of `block`.
///
/// `index == ops.len()` is the block's exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ProgramPoint {
    pub block: BlockId,
    pub index: usize,
}

impl ProgramPoint {
    pub fn new(block: BlockId, index: usize) -> Self {
        Self { block, index }
    }

    pub fn block_entry(block: BlockId) -> Self {
        Self { block, index: 0 }
    }
}

/// Copy analysis over one CFG
#[derive(Debug, Clone, Default)]
pub struct CopyAnalysis {
    config: CopyAnalysisConfig,
    seed: CopyState,
}

impl CopyAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: CopyAnalysisConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the facts holding at CFG entry
    pub fn with_seed(mut self, seed: CopyState) -> Self {
        self.seed = seed;
        self
    }

    /// `entity` holds a value no other entity is known to share at entry
    pub fn seed_known(mut self, entity: EntityId, semantics: CopySemantics) -> Self {
        self.seed.set_singleton(entity, semantics.known_kind());
        self
    }

    /// `entity` is tracked at entry but nothing is known about it
    pub fn seed_unknown(mut self, entity: EntityId) -> Self {
        self.seed.reset_to_unknown(entity);
        self
    }

    /// `target` is a copy of `source` at entry
    pub fn seed_copy(mut self, target: EntityId, source: EntityId) -> Self {
        self.seed.assign_copy(target, source);
        self
    }

    pub fn config(&self) -> &CopyAnalysisConfig {
        &self.config
    }

    /// Run the analysis to a fixed point and materialize every program point
    pub fn analyze(&self, cfg: &Cfg) -> Result<CopyAnalysisResult> {
        self.config.validate()?;

        let seeded: BTreeSet<EntityId> = self.seed.entities().collect();
        cfg.validate(&seeded)?;

        let entity_count = cfg.entities().union(&seeded).count();
        let limit = self.config.iteration_limit(cfg.block_count(), entity_count);

        let fixpoint = FixpointSolver::new(limit)
            .with_verification(self.config.verify_invariants)
            .solve(self, cfg)?;

        let mut points = BTreeMap::new();
        let mut statuses = BTreeMap::new();
        for block in cfg.blocks() {
            statuses.insert(block.id, fixpoint.status(block.id));
            let Some(entry) = fixpoint.in_facts.get(&block.id) else {
                continue;
            };

            let mut current = entry.clone();
            let mut states = Vec::with_capacity(block.ops.len() + 1);
            states.push(current.clone());
            for op in &block.ops {
                if !current.is_invalid() {
                    apply_operation(&mut current, op);
                }
                states.push(current.clone());
            }
            points.insert(block.id, states);
        }

        debug!(
            iterations = fixpoint.iterations,
            reached = points.len(),
            "copy analysis complete"
        );

        Ok(CopyAnalysisResult {
            points,
            statuses,
            iterations: fixpoint.iterations,
        })
    }
}

impl DataflowAnalysis for CopyAnalysis {
    type Fact = CopyState;

    fn initial_fact(&self) -> CopyState {
        self.seed.clone()
    }

    fn join(&self, facts: &[CopyState]) -> CopyState {
        let policy = self.config.merge_policy;
        match facts.split_first() {
            Some((first, rest)) => rest
                .iter()
                .fold(first.clone(), |acc, fact| acc.merge(fact, policy)),
            None => CopyState::invalid(),
        }
    }

    fn transfer(&self, block: &BasicBlock, input: &CopyState) -> CopyState {
        apply_block(input.clone(), &block.ops)
    }

    fn transfer_edge(&self, edge: &CfgEdge, fact: &CopyState) -> CopyState {
        refine_along_edge(fact, &edge.facts)
    }

    fn verify(&self, fact: &CopyState) -> std::result::Result<(), String> {
        fact.check_invariants()
    }
}

/// Stable copy facts for every reached program point
#[derive(Debug, Clone, Serialize)]
pub struct CopyAnalysisResult {
    points: BTreeMap<BlockId, Vec<CopyState>>,
    statuses: BTreeMap<BlockId, BlockStatus>,
    iterations: usize,
}

impl CopyAnalysisResult {
    /// Number of block visits the fixpoint took
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn status(&self, block: BlockId) -> BlockStatus {
        self.statuses
            .get(&block)
            .copied()
            .unwrap_or(BlockStatus::NotVisited)
    }

    /// Whether some feasible path reaches `block`
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.entry_state(block).is_some_and(|state| !state.is_invalid())
    }

    pub fn state_at(&self, point: ProgramPoint) -> Option<&CopyState> {
        self.points.get(&point.block)?.get(point.index)
    }

    pub fn entry_state(&self, block: BlockId) -> Option<&CopyState> {
        self.points.get(&block)?.first()
    }

    pub fn exit_state(&self, block: BlockId) -> Option<&CopyState> {
        self.points.get(&block)?.last()
    }

    /// Copy value of `entity` at `point`.
    ///
    /// Points the analysis never reached, and points proven infeasible,
    /// answer `Invalid`.
    pub fn value_at(&self, point: ProgramPoint, entity: EntityId) -> CopyAbstractValue {
        match self.state_at(point) {
            Some(state) if !state.is_invalid() => state.value_of(entity),
            _ => CopyAbstractValue::singleton(entity, CopyValueKind::Invalid),
        }
    }

    /// Other entities known to hold a copy of `entity` at `point`
    pub fn copies_of(&self, point: ProgramPoint, entity: EntityId) -> Vec<EntityId> {
        self.value_at(point, entity).copies_of(entity).collect()
    }
}

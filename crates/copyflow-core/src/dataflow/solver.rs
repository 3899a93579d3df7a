//! Dataflow analysis framework with worklist-based fixpoint solver

use super::cfg::{BasicBlock, BlockId, Cfg, CfgEdge};
use crate::error::{CopyAnalysisError, Result};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, trace};

/// Generic trait for forward dataflow analyses
pub trait DataflowAnalysis {
    /// The type of facts being propagated
    type Fact: Clone + PartialEq;

    /// Fact holding at entry, before any predecessor is merged in
    fn initial_fact(&self) -> Self::Fact;

    /// Join/merge facts from multiple predecessors (never called empty).
    ///
    /// Must be a meet: commutative, associative and idempotent. The solver
    /// also joins a block's previous input into its new one.
    fn join(&self, facts: &[Self::Fact]) -> Self::Fact;

    /// Transfer function: compute output fact from input fact for a block
    fn transfer(&self, block: &BasicBlock, input: &Self::Fact) -> Self::Fact;

    /// Refine a predecessor's output as it flows along `edge`
    fn transfer_edge(&self, _edge: &CfgEdge, fact: &Self::Fact) -> Self::Fact {
        fact.clone()
    }

    /// Internal consistency check run after each visit when enabled
    fn verify(&self, _fact: &Self::Fact) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Per-block marker of the worklist driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockStatus {
    NotVisited,
    Stable,
}

/// Result of fixpoint computation
#[derive(Debug)]
pub struct FixpointResult<F> {
    /// Facts at entry of each visited block
    pub in_facts: HashMap<BlockId, F>,
    /// Facts at exit of each visited block
    pub out_facts: HashMap<BlockId, F>,
    /// Number of block visits to reach fixpoint
    pub iterations: usize,
}

impl<F> FixpointResult<F> {
    pub fn status(&self, block: BlockId) -> BlockStatus {
        if self.out_facts.contains_key(&block) {
            BlockStatus::Stable
        } else {
            BlockStatus::NotVisited
        }
    }
}

/// Worklist-based fixpoint solver
#[derive(Debug, Clone)]
pub struct FixpointSolver {
    max_iterations: usize,
    verify: bool,
}

impl FixpointSolver {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            verify: false,
        }
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Compute the forward fixpoint of `analysis` over `cfg`.
    ///
    /// The worklist starts with the entry block and pops blocks in reverse
    /// postorder. Predecessors not visited yet contribute nothing to a join.
    /// A revisited block's input is joined with its previous input, so
    /// inputs only descend and the iteration terminates even when edge
    /// refinement is not monotone.
    pub fn solve<A: DataflowAnalysis>(
        &self,
        analysis: &A,
        cfg: &Cfg,
    ) -> Result<FixpointResult<A::Fact>> {
        let rpo = cfg.reverse_postorder();
        let position: HashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let mut in_facts: HashMap<BlockId, A::Fact> = HashMap::new();
        let mut out_facts: HashMap<BlockId, A::Fact> = HashMap::new();

        let mut worklist: BTreeSet<usize> = BTreeSet::new();
        if let Some(&entry) = position.get(&cfg.entry) {
            worklist.insert(entry);
        }

        debug!(
            blocks = cfg.block_count(),
            reachable = rpo.len(),
            limit = self.max_iterations,
            "starting fixpoint iteration"
        );

        let mut iterations = 0;

        while let Some(pos) = worklist.pop_first() {
            let block_id = rpo[pos];
            iterations += 1;

            if iterations > self.max_iterations {
                error!(
                    limit = self.max_iterations,
                    block = %block_id,
                    "fixpoint iteration cap exceeded"
                );
                return Err(CopyAnalysisError::IterationLimitExceeded {
                    limit: self.max_iterations,
                    block: block_id,
                });
            }

            let block = cfg
                .block(block_id)
                .ok_or(CopyAnalysisError::UnknownBlock { block: block_id })?;

            // Compute input by joining visited predecessor outputs
            let mut incoming: Vec<A::Fact> = Vec::new();
            if block_id == cfg.entry {
                incoming.push(analysis.initial_fact());
            }
            incoming.extend(cfg.incoming_edges(block_id).filter_map(|edge| {
                out_facts
                    .get(&edge.from)
                    .map(|fact| analysis.transfer_edge(edge, fact))
            }));

            if incoming.is_empty() {
                return Err(CopyAnalysisError::MalformedCfg {
                    detail: format!("{block_id} was scheduled without a visited predecessor"),
                });
            }

            let joined = analysis.join(&incoming);
            let new_in = match in_facts.get(&block_id) {
                Some(previous) => analysis.join(&[previous.clone(), joined]),
                None => joined,
            };
            let new_out = analysis.transfer(block, &new_in);

            if self.verify {
                for fact in [&new_in, &new_out] {
                    analysis.verify(fact).map_err(|detail| {
                        error!(block = %block_id, %detail, "analysis state invariant violated");
                        CopyAnalysisError::InvariantViolation {
                            block: block_id,
                            detail,
                        }
                    })?;
                }
            }

            // Check if output changed
            let changed = out_facts.get(&block_id).map_or(true, |old| old != &new_out);
            trace!(block = %block_id, iteration = iterations, changed, "visited block");

            in_facts.insert(block_id, new_in);
            if changed {
                out_facts.insert(block_id, new_out);

                // Add successors to worklist
                for succ_id in &block.successors {
                    if let Some(&succ_pos) = position.get(succ_id) {
                        worklist.insert(succ_pos);
                    }
                }
            }
        }

        debug!(iterations, visited = out_facts.len(), "fixpoint reached");

        Ok(FixpointResult {
            in_facts,
            out_facts,
            iterations,
        })
    }
}

//! Control Flow Graph supplied by the host
//!
//! Blocks hold ordered copy-relevant operations. Edges carry the facts a
//! predicate analysis attached to them (equality assertions, unreachable
//! markers), which the solver applies when a state flows along the edge.

use super::lattice::CopySemantics;
use crate::entity::EntityId;
use crate::error::{CopyAnalysisError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Unique identifier for a basic block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A copy-relevant operation inside a basic block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// `target := <fresh value>`
    Define {
        target: EntityId,
        semantics: CopySemantics,
    },
    /// `target := source`
    Assign { target: EntityId, source: EntityId },
    /// Opaque code that may write to these entities (unanalyzed call,
    /// write through an unknown pointer, escaping `&mut`)
    Invalidate { entities: SmallVec<[EntityId; 4]> },
    /// Opaque code that may write to anything
    InvalidateAll,
}

impl Operation {
    pub fn define(target: EntityId, semantics: CopySemantics) -> Self {
        Operation::Define { target, semantics }
    }

    pub fn assign(target: EntityId, source: EntityId) -> Self {
        Operation::Assign { target, source }
    }

    pub fn invalidate(entities: impl IntoIterator<Item = EntityId>) -> Self {
        Operation::Invalidate {
            entities: entities.into_iter().collect(),
        }
    }

    /// Entities the operation mentions
    pub fn entities(&self) -> SmallVec<[EntityId; 4]> {
        match self {
            Operation::Define { target, .. } => SmallVec::from_slice(&[*target]),
            Operation::Assign { target, source } => SmallVec::from_slice(&[*target, *source]),
            Operation::Invalidate { entities } => entities.clone(),
            Operation::InvalidateAll => SmallVec::new(),
        }
    }
}

/// Branch condition understood by the copy analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// `left == right` (value) or `left is right` (reference identity)
    Equals {
        left: EntityId,
        right: EntityId,
        semantics: CopySemantics,
    },
}

/// Fact a predicate analysis established for one edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeAssertion {
    Equal {
        left: EntityId,
        right: EntityId,
        semantics: CopySemantics,
    },
    NotEqual {
        left: EntityId,
        right: EntityId,
        semantics: CopySemantics,
    },
}

impl EdgeAssertion {
    pub fn entities(&self) -> [EntityId; 2] {
        match *self {
            EdgeAssertion::Equal { left, right, .. }
            | EdgeAssertion::NotEqual { left, right, .. } => [left, right],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeFacts {
    pub assertions: SmallVec<[EdgeAssertion; 2]>,
    /// Predicate analysis proved the edge is never taken
    pub unreachable: bool,
}

impl EdgeFacts {
    pub fn asserting(assertion: EdgeAssertion) -> Self {
        Self {
            assertions: SmallVec::from_slice(&[assertion]),
            unreachable: false,
        }
    }
}

/// Edge in the CFG connecting two blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgEdge {
    pub from: BlockId,
    pub to: BlockId,
    pub facts: EdgeFacts,
}

/// How a basic block terminates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminator {
    /// Unconditional jump to another block
    Goto(BlockId),
    /// Two-way branch; the condition, when present, refines both edges
    Branch {
        condition: Option<Condition>,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Return from the function (edge to the exit block)
    Return,
    /// Control never leaves the block
    Unreachable,
}

impl Terminator {
    fn targets(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            Terminator::Goto(target) => SmallVec::from_slice(&[*target]),
            Terminator::Branch {
                then_block, else_block, ..
            } => SmallVec::from_slice(&[*then_block, *else_block]),
            Terminator::Return | Terminator::Unreachable => SmallVec::new(),
        }
    }
}

/// A basic block in the CFG
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub ops: Vec<Operation>,
    pub terminator: Option<Terminator>,
    pub predecessors: SmallVec<[BlockId; 2]>,
    pub successors: SmallVec<[BlockId; 2]>,
    incoming: SmallVec<[usize; 2]>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            ops: Vec::new(),
            terminator: None,
            predecessors: SmallVec::new(),
            successors: SmallVec::new(),
            incoming: SmallVec::new(),
        }
    }
}

/// Control Flow Graph
#[derive(Debug, Clone, Serialize)]
pub struct Cfg {
    blocks: IndexMap<BlockId, BasicBlock>,
    edges: Vec<CfgEdge>,
    pub entry: BlockId,
    pub exit: BlockId,
    declared: BTreeSet<EntityId>,
    next_block_id: usize,
}

impl Cfg {
    pub fn new() -> Self {
        let mut cfg = Self {
            blocks: IndexMap::new(),
            edges: Vec::new(),
            entry: BlockId(0),
            exit: BlockId(0),
            declared: BTreeSet::new(),
            next_block_id: 0,
        };

        cfg.entry = cfg.new_block();
        cfg.exit = cfg.new_block();

        cfg
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        self.blocks.insert(id, BasicBlock::new(id));
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn edges(&self) -> &[CfgEdge] {
        &self.edges
    }

    /// Edges flowing into `block`, in insertion order
    pub fn incoming_edges(&self, block: BlockId) -> impl Iterator<Item = &CfgEdge> {
        self.blocks
            .get(&block)
            .into_iter()
            .flat_map(|b| b.incoming.iter())
            .filter_map(|&index| self.edges.get(index))
    }

    pub fn push_op(&mut self, block: BlockId, op: Operation) -> Result<()> {
        let b = self
            .blocks
            .get_mut(&block)
            .ok_or(CopyAnalysisError::UnknownBlock { block })?;
        b.ops.push(op);
        Ok(())
    }

    /// Declare an entity that no operation mentions (e.g. a parameter only
    /// ever compared against)
    pub fn declare_entity(&mut self, entity: EntityId) {
        self.declared.insert(entity);
    }

    /// Every entity mentioned by an operation or declared
    pub fn entities(&self) -> BTreeSet<EntityId> {
        let mut entities = self.declared.clone();
        for block in self.blocks.values() {
            for op in &block.ops {
                entities.extend(op.entities());
            }
        }
        entities
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        self.add_edge_with_facts(from, to, EdgeFacts::default())
    }

    pub fn add_edge_with_facts(
        &mut self,
        from: BlockId,
        to: BlockId,
        facts: EdgeFacts,
    ) -> Result<()> {
        for block in [from, to] {
            if !self.blocks.contains_key(&block) {
                return Err(CopyAnalysisError::UnknownBlock { block });
            }
        }

        let index = self.edges.len();
        self.edges.push(CfgEdge { from, to, facts });

        if let Some(block) = self.blocks.get_mut(&from) {
            if !block.successors.contains(&to) {
                block.successors.push(to);
            }
        }
        if let Some(block) = self.blocks.get_mut(&to) {
            if !block.predecessors.contains(&from) {
                block.predecessors.push(from);
            }
            block.incoming.push(index);
        }
        Ok(())
    }

    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) -> Result<()> {
        let b = self
            .blocks
            .get_mut(&block)
            .ok_or(CopyAnalysisError::UnknownBlock { block })?;
        b.terminator = Some(terminator);
        Ok(())
    }

    pub fn goto(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        self.set_terminator(from, Terminator::Goto(to))?;
        self.add_edge(from, to)
    }

    /// Terminate `from` with a two-way branch.
    ///
    /// An equality condition is asserted on the `then` edge and denied on
    /// the `else` edge.
    pub fn branch(
        &mut self,
        from: BlockId,
        condition: Option<Condition>,
        then_block: BlockId,
        else_block: BlockId,
    ) -> Result<()> {
        self.set_terminator(
            from,
            Terminator::Branch {
                condition,
                then_block,
                else_block,
            },
        )?;

        let (then_facts, else_facts) = match condition {
            Some(Condition::Equals {
                left,
                right,
                semantics,
            }) => (
                EdgeFacts::asserting(EdgeAssertion::Equal {
                    left,
                    right,
                    semantics,
                }),
                EdgeFacts::asserting(EdgeAssertion::NotEqual {
                    left,
                    right,
                    semantics,
                }),
            ),
            None => (EdgeFacts::default(), EdgeFacts::default()),
        };

        self.add_edge_with_facts(from, then_block, then_facts)?;
        self.add_edge_with_facts(from, else_block, else_facts)
    }

    pub fn ret(&mut self, from: BlockId) -> Result<()> {
        self.set_terminator(from, Terminator::Return)?;
        let exit = self.exit;
        self.add_edge(from, exit)
    }

    /// Record that predicate analysis proved every `from -> to` edge dead
    pub fn mark_unreachable(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        let mut found = false;
        for edge in self.edges.iter_mut().filter(|e| e.from == from && e.to == to) {
            edge.facts.unreachable = true;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(CopyAnalysisError::UnknownEdge { from, to })
        }
    }

    /// Attach an externally computed assertion to every `from -> to` edge
    pub fn assert_on_edge(
        &mut self,
        from: BlockId,
        to: BlockId,
        assertion: EdgeAssertion,
    ) -> Result<()> {
        let mut found = false;
        for edge in self.edges.iter_mut().filter(|e| e.from == from && e.to == to) {
            edge.facts.assertions.push(assertion);
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(CopyAnalysisError::UnknownEdge { from, to })
        }
    }

    /// Check the graph before analysis.
    ///
    /// `extra` holds entities known from outside the graph (entry seeds).
    pub fn validate(&self, extra: &BTreeSet<EntityId>) -> Result<()> {
        if !self.blocks.contains_key(&self.entry) {
            return Err(CopyAnalysisError::MalformedCfg {
                detail: format!("entry block {} is missing", self.entry),
            });
        }

        for block in self.blocks.values() {
            let Some(terminator) = &block.terminator else {
                continue;
            };
            for target in terminator.targets() {
                if !self.blocks.contains_key(&target) {
                    return Err(CopyAnalysisError::UnknownBlock { block: target });
                }
                if !block.successors.contains(&target) {
                    return Err(CopyAnalysisError::MalformedCfg {
                        detail: format!("{} jumps to {target} without an edge", block.id),
                    });
                }
            }
        }

        let known = self.entities();
        for edge in &self.edges {
            for assertion in &edge.facts.assertions {
                for entity in assertion.entities() {
                    if !known.contains(&entity) && !extra.contains(&entity) {
                        return Err(CopyAnalysisError::UnknownEntity {
                            entity,
                            from: edge.from,
                            to: edge.to,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Get blocks reachable from entry in reverse postorder
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut postorder = self.postorder();
        postorder.reverse();
        postorder
    }

    /// Get blocks reachable from entry in postorder
    pub fn postorder(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        visited.insert(self.entry);

        while let Some((block, next_child)) = stack.pop() {
            let successors = self
                .blocks
                .get(&block)
                .map(|b| b.successors.as_slice())
                .unwrap_or(&[]);

            match successors.get(next_child) {
                Some(&succ) => {
                    stack.push((block, next_child + 1));
                    if visited.insert(succ) {
                        stack.push((succ, 0));
                    }
                }
                None => postorder.push(block),
            }
        }

        postorder
    }
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: EntityId = EntityId(0);
    const B: EntityId = EntityId(1);

    fn diamond() -> (Cfg, BlockId, BlockId, BlockId) {
        let mut cfg = Cfg::new();
        let then_block = cfg.new_block();
        let else_block = cfg.new_block();
        let merge = cfg.new_block();
        cfg.branch(cfg.entry, None, then_block, else_block).unwrap();
        cfg.goto(then_block, merge).unwrap();
        cfg.goto(else_block, merge).unwrap();
        cfg.ret(merge).unwrap();
        (cfg, then_block, else_block, merge)
    }

    #[test]
    fn test_cfg_new_has_entry_and_exit() {
        let cfg = Cfg::new();
        assert_eq!(cfg.block_count(), 2);
        assert!(cfg.block(cfg.entry).is_some());
        assert!(cfg.block(cfg.exit).is_some());
        assert_ne!(cfg.entry, cfg.exit);
    }

    #[test]
    fn test_diamond_edges() {
        let (cfg, then_block, else_block, merge) = diamond();
        let merge_block = cfg.block(merge).unwrap();
        assert_eq!(merge_block.predecessors.as_slice(), &[then_block, else_block]);
        assert_eq!(cfg.incoming_edges(merge).count(), 2);
        assert!(matches!(
            cfg.block(cfg.entry).unwrap().terminator,
            Some(Terminator::Branch { .. })
        ));
    }

    #[test]
    fn test_reverse_postorder() {
        let (cfg, _, _, merge) = diamond();
        let rpo = cfg.reverse_postorder();

        // Entry should come first in RPO, merge after both arms
        assert_eq!(rpo[0], cfg.entry);
        let merge_pos = rpo.iter().position(|&b| b == merge).unwrap();
        assert_eq!(merge_pos, rpo.len() - 2);
        assert_eq!(*rpo.last().unwrap(), cfg.exit);
    }

    #[test]
    fn test_reverse_postorder_skips_unreachable_blocks() {
        let mut cfg = Cfg::new();
        let orphan = cfg.new_block();
        cfg.ret(cfg.entry).unwrap();
        cfg.ret(orphan).unwrap();
        assert!(!cfg.reverse_postorder().contains(&orphan));
    }

    #[test]
    fn test_reverse_postorder_with_back_edge() {
        let mut cfg = Cfg::new();
        let header = cfg.new_block();
        let body = cfg.new_block();
        let after = cfg.new_block();
        cfg.goto(cfg.entry, header).unwrap();
        cfg.branch(header, None, body, after).unwrap();
        cfg.goto(body, header).unwrap();
        cfg.ret(after).unwrap();

        let rpo = cfg.reverse_postorder();
        let pos = |b: BlockId| rpo.iter().position(|&x| x == b).unwrap();
        assert!(pos(header) < pos(body));
        assert!(pos(header) < pos(after));
        assert_eq!(rpo.len(), 5);
    }

    #[test]
    fn test_branch_derives_edge_facts() {
        let mut cfg = Cfg::new();
        let then_block = cfg.new_block();
        let else_block = cfg.new_block();
        let condition = Condition::Equals {
            left: A,
            right: B,
            semantics: CopySemantics::Value,
        };
        cfg.branch(cfg.entry, Some(condition), then_block, else_block).unwrap();

        let then_edge = cfg.incoming_edges(then_block).next().unwrap();
        assert!(matches!(then_edge.facts.assertions[0], EdgeAssertion::Equal { .. }));
        let else_edge = cfg.incoming_edges(else_block).next().unwrap();
        assert!(matches!(else_edge.facts.assertions[0], EdgeAssertion::NotEqual { .. }));
    }

    #[test]
    fn test_mark_unreachable_requires_edge() {
        let (mut cfg, then_block, _, merge) = diamond();
        assert!(cfg.mark_unreachable(then_block, merge).is_ok());
        assert_eq!(
            cfg.mark_unreachable(merge, then_block),
            Err(CopyAnalysisError::UnknownEdge {
                from: merge,
                to: then_block
            })
        );
    }

    #[test]
    fn test_unknown_block_is_rejected() {
        let mut cfg = Cfg::new();
        assert_eq!(
            cfg.add_edge(cfg.entry, BlockId(99)),
            Err(CopyAnalysisError::UnknownBlock { block: BlockId(99) })
        );
        assert!(cfg.push_op(BlockId(42), Operation::InvalidateAll).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_predicate_entity() {
        let (mut cfg, then_block, _, merge) = diamond();
        cfg.push_op(then_block, Operation::assign(A, B)).unwrap();
        cfg.assert_on_edge(
            then_block,
            merge,
            EdgeAssertion::Equal {
                left: A,
                right: EntityId(9),
                semantics: CopySemantics::Value,
            },
        )
        .unwrap();

        let err = cfg.validate(&BTreeSet::new()).unwrap_err();
        assert_eq!(
            err,
            CopyAnalysisError::UnknownEntity {
                entity: EntityId(9),
                from: then_block,
                to: merge
            }
        );
        assert!(cfg.validate(&BTreeSet::from([EntityId(9)])).is_ok());
    }

    #[test]
    fn test_validate_rejects_terminator_without_edge() {
        let mut cfg = Cfg::new();
        let target = cfg.new_block();
        cfg.set_terminator(cfg.entry, Terminator::Goto(target)).unwrap();
        assert!(matches!(
            cfg.validate(&BTreeSet::new()),
            Err(CopyAnalysisError::MalformedCfg { .. })
        ));
    }

    #[test]
    fn test_entities_collects_ops_and_declarations() {
        let mut cfg = Cfg::new();
        cfg.push_op(cfg.entry, Operation::assign(A, B)).unwrap();
        cfg.push_op(cfg.entry, Operation::invalidate([EntityId(5)])).unwrap();
        cfg.declare_entity(EntityId(7));
        let entities: Vec<_> = cfg.entities().into_iter().collect();
        assert_eq!(entities, vec![A, B, EntityId(5), EntityId(7)]);
    }
}

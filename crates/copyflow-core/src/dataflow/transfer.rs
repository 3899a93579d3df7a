//! Transfer functions for copy analysis
//!
//! Operations rewrite only the entities they name (and the classes those
//! entities leave or join). Edge refinement applies the facts a predicate
//! analysis attached to a CFG edge.

use super::cfg::{EdgeAssertion, EdgeFacts, Operation};
use super::lattice::{CopySemantics, CopyValueKind};
use super::state::CopyState;
use crate::entity::EntityId;
use tracing::trace;

/// Apply one operation in place
pub fn apply_operation(state: &mut CopyState, op: &Operation) {
    match op {
        Operation::Define { target, semantics } => {
            state.set_singleton(*target, semantics.known_kind());
        }
        Operation::Assign { target, source } => {
            state.assign_copy(*target, *source);
        }
        Operation::Invalidate { entities } => {
            for &entity in entities {
                state.reset_to_unknown(entity);
            }
        }
        Operation::InvalidateAll => state.reset_all_to_unknown(),
    }
}

/// Run a block's operations over its incoming state.
///
/// An unreachable incoming state stays unreachable.
pub fn apply_block(mut state: CopyState, ops: &[Operation]) -> CopyState {
    if state.is_invalid() {
        return state;
    }
    for op in ops {
        apply_operation(&mut state, op);
    }
    state
}

/// State observed at the head of an edge leaving a block with `state`
pub fn refine_along_edge(state: &CopyState, facts: &EdgeFacts) -> CopyState {
    if facts.unreachable || state.is_invalid() {
        return CopyState::invalid();
    }

    let mut refined = state.clone();
    for assertion in &facts.assertions {
        match *assertion {
            EdgeAssertion::Equal {
                left,
                right,
                semantics,
            } => {
                refined.union_with_kind(left, right, semantics.known_kind());
            }
            EdgeAssertion::NotEqual {
                left,
                right,
                semantics,
            } => {
                if contradicts_inequality(&refined, left, right, semantics) {
                    trace!(%left, %right, "inequality contradicts known copy; edge is infeasible");
                    refined.mark_invalid();
                    return refined;
                }
            }
        }
    }
    refined
}

/// Whether asserting `left != right` is impossible in `state`.
///
/// Value copies may still be distinct references, so only a reference copy
/// contradicts an identity inequality.
fn contradicts_inequality(
    state: &CopyState,
    left: EntityId,
    right: EntityId,
    semantics: CopySemantics,
) -> bool {
    if left == right || !state.are_copies(left, right) {
        return false;
    }
    match semantics {
        CopySemantics::Value => true,
        CopySemantics::Reference => state.kind_of(left) == CopyValueKind::KnownReferenceCopy,
    }
}

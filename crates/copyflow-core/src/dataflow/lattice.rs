//! Copy lattice for dataflow analysis
//!
//! Implements the abstract values tracked per entity:
//! - Known copies (reference or value) carry the full equivalence class
//! - Unknown / NotApplicable carry no aliasing claim
//! - Invalid marks a program point proven unreachable by predicate analysis

use crate::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Kind of a copy value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CopyValueKind {
    /// No copy information is tracked for the entity
    NotApplicable,
    /// All members hold the identical reference
    KnownReferenceCopy,
    /// All members hold equal values
    KnownValueCopy,
    /// Copy may or may not be shared with other entities
    Unknown,
    /// Unreachable path from predicate analysis
    Invalid,
}

impl CopyValueKind {
    pub fn is_known(self) -> bool {
        match self {
            CopyValueKind::KnownReferenceCopy | CopyValueKind::KnownValueCopy => true,
            CopyValueKind::NotApplicable | CopyValueKind::Unknown | CopyValueKind::Invalid => false,
        }
    }

    /// Merge two kinds when both are known.
    ///
    /// Returns `self` untouched if either side is not known; callers decide
    /// what an unknown operand does to the merged value. Reference identity
    /// only survives when both sides guarantee it.
    pub fn merge_if_both_known(self, other: CopyValueKind) -> CopyValueKind {
        if !self.is_known() || !other.is_known() {
            return self;
        }

        if self == CopyValueKind::KnownValueCopy || other == CopyValueKind::KnownValueCopy {
            CopyValueKind::KnownValueCopy
        } else {
            CopyValueKind::KnownReferenceCopy
        }
    }
}

/// How a fresh value or an equality comparison relates its operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CopySemantics {
    /// Identity: both sides are the same reference
    Reference,
    /// Equality of contents
    Value,
}

impl CopySemantics {
    pub fn known_kind(self) -> CopyValueKind {
        match self {
            CopySemantics::Reference => CopyValueKind::KnownReferenceCopy,
            CopySemantics::Value => CopyValueKind::KnownValueCopy,
        }
    }
}

/// The copy value of one entity at one program point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyAbstractValue {
    pub kind: CopyValueKind,
    pub members: BTreeSet<EntityId>,
}

impl CopyAbstractValue {
    /// A known class; `members` must contain every entity of the class
    pub fn known(kind: CopyValueKind, members: BTreeSet<EntityId>) -> Self {
        debug_assert!(kind.is_known());
        debug_assert!(!members.is_empty());
        Self { kind, members }
    }

    pub fn singleton(entity: EntityId, kind: CopyValueKind) -> Self {
        Self {
            kind,
            members: BTreeSet::from([entity]),
        }
    }

    pub fn not_applicable(entity: EntityId) -> Self {
        Self::singleton(entity, CopyValueKind::NotApplicable)
    }

    pub fn unknown(entity: EntityId) -> Self {
        Self::singleton(entity, CopyValueKind::Unknown)
    }

    pub fn is_known(&self) -> bool {
        self.kind.is_known()
    }

    /// Other entities proven to be copies of `entity`
    pub fn copies_of(&self, entity: EntityId) -> impl Iterator<Item = EntityId> + '_ {
        let known = self.is_known();
        self.members
            .iter()
            .copied()
            .filter(move |&member| known && member != entity)
    }
}

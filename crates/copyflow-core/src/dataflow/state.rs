//! Equivalence class store
//!
//! A [`CopyState`] maps every tracked entity to the copy value it holds at
//! one program point. Classes live in an arena and entities hold the slot
//! index of their class, so all members of a class observe one shared value:
//! rewriting a class rewrites every member at once.

use super::lattice::{CopyAbstractValue, CopyValueKind};
use crate::config::MergePolicy;
use crate::entity::EntityId;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ClassId(u32);

impl ClassId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CopyClass {
    kind: CopyValueKind,
    members: BTreeSet<EntityId>,
}

/// Copy facts at a single program point
#[derive(Debug, Clone, Default)]
pub struct CopyState {
    slots: BTreeMap<EntityId, ClassId>,
    classes: Vec<Option<CopyClass>>,
    free: Vec<ClassId>,
    invalid: bool,
}

impl CopyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state for a program point proven unreachable
    pub fn invalid() -> Self {
        Self {
            invalid: true,
            ..Self::default()
        }
    }

    /// Seed `entity` with a fresh known singleton class
    pub fn with_known(mut self, entity: EntityId, kind: CopyValueKind) -> Self {
        debug_assert!(kind.is_known());
        self.set_singleton(entity, kind);
        self
    }

    /// Seed `entity` as tracked but unknown
    pub fn with_unknown(mut self, entity: EntityId) -> Self {
        self.set_singleton(entity, CopyValueKind::Unknown);
        self
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid || self.live_classes().any(|class| class.kind == CopyValueKind::Invalid)
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.slots.contains_key(&entity)
    }

    /// Tracked entities in ascending id order
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Copy value of `entity`; untracked entities are `NotApplicable`
    pub fn value_of(&self, entity: EntityId) -> CopyAbstractValue {
        match self.class_of(entity) {
            Some(class) => CopyAbstractValue {
                kind: class.kind,
                members: class.members.clone(),
            },
            None => CopyAbstractValue::not_applicable(entity),
        }
    }

    pub fn kind_of(&self, entity: EntityId) -> CopyValueKind {
        self.class_of(entity)
            .map_or(CopyValueKind::NotApplicable, |class| class.kind)
    }

    /// Whether `a` and `b` currently share a known class
    pub fn are_copies(&self, a: EntityId, b: EntityId) -> bool {
        match (self.slots.get(&a), self.slots.get(&b)) {
            (Some(ca), Some(cb)) => ca == cb && self.kind_of(a).is_known(),
            _ => false,
        }
    }

    /// All known equivalence classes, each reported once
    pub fn known_classes(&self) -> impl Iterator<Item = CopyAbstractValue> + '_ {
        self.live_classes()
            .filter(|class| class.kind.is_known())
            .map(|class| CopyAbstractValue::known(class.kind, class.members.clone()))
    }

    /// Detach `entity` and give it a fresh singleton class of `kind`
    pub fn set_singleton(&mut self, entity: EntityId, kind: CopyValueKind) {
        self.detach(entity);
        let id = self.alloc(CopyClass {
            kind,
            members: BTreeSet::from([entity]),
        });
        self.slots.insert(entity, id);
    }

    /// Sever `entity` from its class; the remaining members stay mutual copies
    pub fn reset_to_unknown(&mut self, entity: EntityId) {
        self.set_singleton(entity, CopyValueKind::Unknown);
    }

    pub fn split(&mut self, entity: EntityId) {
        self.reset_to_unknown(entity);
    }

    /// Reset every tracked entity to a singleton `Unknown`
    pub fn reset_all_to_unknown(&mut self) {
        let entities: Vec<EntityId> = self.entities().collect();
        for entity in entities {
            self.reset_to_unknown(entity);
        }
    }

    /// Mark the whole program point unreachable
    pub fn mark_invalid(&mut self) {
        let entities: Vec<EntityId> = self.entities().collect();
        for entity in entities {
            self.set_singleton(entity, CopyValueKind::Invalid);
        }
        self.invalid = true;
    }

    /// `target` leaves its class and joins `source`'s.
    ///
    /// A non-known source has nothing to share: `target` becomes a singleton
    /// of the source's kind instead.
    pub fn assign_copy(&mut self, target: EntityId, source: EntityId) {
        if target == source {
            return;
        }

        let source_kind = self.kind_of(source);
        if !source_kind.is_known() {
            self.set_singleton(target, source_kind);
            return;
        }

        self.detach(target);
        let Some(&id) = self.slots.get(&source) else {
            return;
        };
        if let Some(class) = self.class_mut(id) {
            class.members.insert(target);
        }
        self.slots.insert(target, id);
    }

    /// Merge the classes of `a` and `b`.
    ///
    /// Two known classes combine at the merged kind. If either side is not
    /// known, the merged class is `Unknown`: every member of both classes
    /// is rewritten to a singleton `Unknown`.
    pub fn union(&mut self, a: EntityId, b: EntityId) {
        if a == b {
            return;
        }

        let ka = self.kind_of(a);
        let kb = self.kind_of(b);
        if ka.is_known() && kb.is_known() {
            self.merge_classes(a, b, ka.merge_if_both_known(kb));
            return;
        }

        let mut affected = self.value_of(a).members;
        affected.extend(self.value_of(b).members);
        for entity in affected {
            self.reset_to_unknown(entity);
        }
    }

    /// Merge the classes of `a` and `b` under a proven equality of `kind`
    pub fn union_with_kind(&mut self, a: EntityId, b: EntityId, kind: CopyValueKind) {
        debug_assert!(kind.is_known());
        if a == b {
            return;
        }

        for side in [a, b] {
            if !self.kind_of(side).is_known() {
                self.set_singleton(side, kind);
            }
        }

        let merged = kind
            .merge_if_both_known(self.kind_of(a))
            .merge_if_both_known(self.kind_of(b));
        self.merge_classes(a, b, merged);
    }

    /// Pointwise merge at a confluence point.
    ///
    /// Invalid states contribute nothing. An entity stays known only when
    /// both sides know it; what counts as agreement on members depends on
    /// `policy`.
    pub fn merge(&self, other: &CopyState, policy: MergePolicy) -> CopyState {
        if self.is_invalid() {
            return other.clone();
        }
        if other.is_invalid() {
            return self.clone();
        }

        let mut merged = CopyState::new();
        let entities: BTreeSet<EntityId> = self.entities().chain(other.entities()).collect();

        for &entity in &entities {
            if merged.contains(entity) {
                continue;
            }

            let left = self.class_of(entity);
            let right = other.class_of(entity);
            match (left, right) {
                (Some(l), Some(r)) if l.kind.is_known() && r.kind.is_known() => {
                    let members = match policy {
                        MergePolicy::Conservative if l.members == r.members => {
                            Some(l.members.clone())
                        }
                        MergePolicy::Conservative => None,
                        MergePolicy::Intersect => {
                            Some(l.members.intersection(&r.members).copied().collect())
                        }
                    };
                    match members {
                        Some(members) => {
                            merged.insert_class(l.kind.merge_if_both_known(r.kind), members)
                        }
                        None => merged.set_singleton(entity, CopyValueKind::Unknown),
                    }
                }
                _ if self.kind_of(entity) == CopyValueKind::NotApplicable
                    && other.kind_of(entity) == CopyValueKind::NotApplicable =>
                {
                    merged.set_singleton(entity, CopyValueKind::NotApplicable)
                }
                _ => merged.set_singleton(entity, CopyValueKind::Unknown),
            }
        }

        merged
    }

    /// Verify the class store is internally consistent
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (&entity, &id) in &self.slots {
            let class = self
                .class(id)
                .ok_or_else(|| format!("{entity} points at vacant class slot {}", id.0))?;
            if !class.members.contains(&entity) {
                return Err(format!("{entity} is missing from its own class"));
            }
            if class.kind.is_known() {
                for member in &class.members {
                    if self.slots.get(member) != Some(&id) {
                        return Err(format!(
                            "{member} is listed as a copy of {entity} but does not share its class"
                        ));
                    }
                }
            } else if class.members.len() != 1 {
                return Err(format!(
                    "{entity} is {:?} but its class has {} members",
                    class.kind,
                    class.members.len()
                ));
            }
        }

        for (index, slot) in self.classes.iter().enumerate() {
            if let Some(class) = slot {
                if class.members.is_empty() {
                    return Err(format!("class slot {index} is live but empty"));
                }
                for member in &class.members {
                    if self.slots.get(member).map(|id| id.index()) != Some(index) {
                        return Err(format!(
                            "class slot {index} lists {member}, which points elsewhere"
                        ));
                    }
                }
            }
        }

        for id in &self.free {
            if self.class(*id).is_some() {
                return Err(format!("class slot {} is both free and live", id.0));
            }
        }

        Ok(())
    }

    /// Materialize the state as a plain entity -> value map
    pub fn snapshot(&self) -> BTreeMap<EntityId, CopyAbstractValue> {
        self.entities().map(|entity| (entity, self.value_of(entity))).collect()
    }

    fn class(&self, id: ClassId) -> Option<&CopyClass> {
        self.classes.get(id.index()).and_then(Option::as_ref)
    }

    fn class_mut(&mut self, id: ClassId) -> Option<&mut CopyClass> {
        self.classes.get_mut(id.index()).and_then(Option::as_mut)
    }

    fn class_of(&self, entity: EntityId) -> Option<&CopyClass> {
        self.slots.get(&entity).and_then(|&id| self.class(id))
    }

    fn live_classes(&self) -> impl Iterator<Item = &CopyClass> {
        self.classes.iter().flatten()
    }

    fn alloc(&mut self, class: CopyClass) -> ClassId {
        match self.free.pop() {
            Some(id) => {
                self.classes[id.index()] = Some(class);
                id
            }
            None => {
                self.classes.push(Some(class));
                ClassId((self.classes.len() - 1) as u32)
            }
        }
    }

    fn release(&mut self, id: ClassId) {
        if let Some(slot) = self.classes.get_mut(id.index()) {
            if slot.take().is_some() {
                self.free.push(id);
            }
        }
    }

    /// Remove `entity` from its class and from the state
    fn detach(&mut self, entity: EntityId) {
        let Some(id) = self.slots.remove(&entity) else {
            return;
        };
        let now_empty = match self.class_mut(id) {
            Some(class) => {
                class.members.remove(&entity);
                class.members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.release(id);
        }
    }

    /// Install a class for entities not yet tracked in this state
    fn insert_class(&mut self, kind: CopyValueKind, members: BTreeSet<EntityId>) {
        for member in &members {
            self.detach(*member);
        }
        let targets: Vec<EntityId> = members.iter().copied().collect();
        let id = self.alloc(CopyClass { kind, members });
        for member in targets {
            self.slots.insert(member, id);
        }
    }

    fn merge_classes(&mut self, a: EntityId, b: EntityId, kind: CopyValueKind) {
        let (Some(&keep), Some(&absorb)) = (self.slots.get(&a), self.slots.get(&b)) else {
            return;
        };

        if keep != absorb {
            let moved = self
                .classes
                .get_mut(absorb.index())
                .and_then(Option::take)
                .map(|class| class.members)
                .unwrap_or_default();
            self.free.push(absorb);
            for member in &moved {
                self.slots.insert(*member, keep);
            }
            if let Some(class) = self.class_mut(keep) {
                class.members.extend(moved);
            }
        }

        if let Some(class) = self.class_mut(keep) {
            class.kind = kind;
        }
    }
}

impl PartialEq for CopyState {
    fn eq(&self, other: &Self) -> bool {
        if self.is_invalid() || other.is_invalid() {
            return self.is_invalid() == other.is_invalid();
        }
        self.slots.len() == other.slots.len()
            && self.slots.keys().all(|&entity| {
                match (self.class_of(entity), other.class_of(entity)) {
                    (Some(l), Some(r)) => l == r,
                    _ => false,
                }
            })
    }
}

impl Eq for CopyState {}

#[derive(Serialize)]
struct StateView {
    invalid: bool,
    entities: BTreeMap<EntityId, CopyAbstractValue>,
}

impl Serialize for CopyState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        StateView {
            invalid: self.is_invalid(),
            entities: self.snapshot(),
        }
        .serialize(serializer)
    }
}

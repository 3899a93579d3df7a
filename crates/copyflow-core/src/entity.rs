//! Analysis entities
//!
//! Entities are storage locations supplied by the host (locals, fields,
//! array slots). The core never creates or destroys them; it only compares
//! ids. Hosts that identify locations by name can intern them through an
//! [`EntityTable`].

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for a trackable storage location
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Interner mapping host names to dense entity ids
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityTable {
    names: IndexSet<String>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `name`, allocating one on first use
    pub fn intern(&mut self, name: &str) -> EntityId {
        if let Some(index) = self.names.get_index_of(name) {
            return EntityId(index as u32);
        }
        let (index, _) = self.names.insert_full(name.to_string());
        EntityId(index as u32)
    }

    pub fn lookup(&self, name: &str) -> Option<EntityId> {
        self.names.get_index_of(name).map(|index| EntityId(index as u32))
    }

    pub fn name(&self, id: EntityId) -> Option<&str> {
        self.names.get_index(id.index()).map(String::as_str)
    }

    /// Human-readable label, falling back to the raw id
    pub fn display(&self, id: EntityId) -> String {
        match self.name(id) {
            Some(name) => name.to_string(),
            None => id.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(index, name)| (EntityId(index as u32), name.as_str()))
    }
}

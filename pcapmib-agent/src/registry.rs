//! Ordered monitor registry
//!
//! Entries are kept in strictly ascending index order and can be looked up
//! either exactly or by successor ("get-next"), which is what index-addressed
//! table walks need. The registry is owned by the event loop and is never
//! shared, so it carries no synchronization of its own.

use std::collections::btree_map::{self, BTreeMap};
use std::ops::Bound;
use thiserror::Error;

/// Anything that can be stored in a [`Registry`]
pub trait Indexed {
    /// Sort and lookup key; must not change while the entry is registered
    fn index(&self) -> u32;
}

/// Registry outcomes that are not a plain hit
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("an entry with index {0} already exists")]
    DuplicateIndex(u32),

    #[error("no entry with index {0}")]
    NotFound(u32),

    #[error("end of table")]
    EndOfTable,
}

/// Index-ordered collection of entries
#[derive(Debug)]
pub struct Registry<E> {
    entries: BTreeMap<u32, E>,
}

impl<E: Indexed> Registry<E> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert an entry at its ordered position
    ///
    /// Fails with [`RegistryError::DuplicateIndex`] if the index is taken,
    /// in which case the registry is left untouched and `entry` is dropped.
    pub fn insert(&mut self, entry: E) -> Result<(), RegistryError> {
        let index = entry.index();
        match self.entries.entry(index) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
            btree_map::Entry::Occupied(_) => Err(RegistryError::DuplicateIndex(index)),
        }
    }

    /// Detach an entry and hand it back to the caller for finalization
    pub fn remove(&mut self, index: u32) -> Result<E, RegistryError> {
        self.entries
            .remove(&index)
            .ok_or(RegistryError::NotFound(index))
    }

    /// Exact lookup
    pub fn get(&self, index: u32) -> Result<&E, RegistryError> {
        self.entries
            .get(&index)
            .ok_or(RegistryError::NotFound(index))
    }

    /// Exact lookup for the capture callback, the only mutator of live entries
    pub fn get_mut(&mut self, index: u32) -> Result<&mut E, RegistryError> {
        self.entries
            .get_mut(&index)
            .ok_or(RegistryError::NotFound(index))
    }

    /// First entry whose index is strictly greater than `index`
    ///
    /// A key below every live index yields the first entry.
    pub fn successor(&self, index: u32) -> Result<&E, RegistryError> {
        self.entries
            .range((Bound::Excluded(index), Bound::Unbounded))
            .next()
            .map(|(_, entry)| entry)
            .ok_or(RegistryError::EndOfTable)
    }

    /// Entry with the smallest index (successor of minus infinity)
    pub fn first(&self) -> Result<&E, RegistryError> {
        self.entries
            .values()
            .next()
            .ok_or(RegistryError::EndOfTable)
    }

    /// In-order traversal
    ///
    /// The iterator borrows the registry, so entries cannot be inserted or
    /// removed while it is alive. Each call starts a fresh walk.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &E> + '_ {
        self.entries.values()
    }

    /// Live indices in ascending order
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn contains(&self, index: u32) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E: Indexed> Default for Registry<E> {
    fn default() -> Self {
        Self::new()
    }
}

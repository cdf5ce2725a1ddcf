//! Optional persistence collaborators.
//!
//! Both stores are best-effort caches: callers log failures and carry on,
//! so an unavailable backend never stops an episode.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::codec::StateKey;
use crate::error::PersistenceError;

/// Records which positions have been visited.
pub trait StateIndex {
    /// Insert `key` unless present. Returns `true` when it was new.
    fn insert_if_absent(&mut self, key: &StateKey) -> Result<bool, PersistenceError>;
}

/// Running value estimate for a position, accumulated across searches.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quality {
    pub visits: u32,
    pub value: f64,
}

impl Quality {
    /// Fold one more observation into the running mean.
    pub fn merged(self, value: f64) -> Quality {
        let visits = self.visits + 1;
        Quality {
            visits,
            value: self.value + (value - self.value) / visits as f64,
        }
    }
}

/// Key-value store of position quality.
pub trait QualityStore {
    fn get(&self, key: &StateKey) -> Result<Option<Quality>, PersistenceError>;
    fn put(&mut self, key: &StateKey, quality: Quality) -> Result<(), PersistenceError>;
}

/// Collaborator used when no backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPersistence;

impl StateIndex for NoPersistence {
    fn insert_if_absent(&mut self, _key: &StateKey) -> Result<bool, PersistenceError> {
        Ok(false)
    }
}

impl QualityStore for NoPersistence {
    fn get(&self, _key: &StateKey) -> Result<Option<Quality>, PersistenceError> {
        Ok(None)
    }

    fn put(&mut self, _key: &StateKey, _quality: Quality) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStateIndex {
    keys: HashSet<StateKey>,
}

impl MemoryStateIndex {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &StateKey) -> bool {
        self.keys.contains(key)
    }
}

impl StateIndex for MemoryStateIndex {
    fn insert_if_absent(&mut self, key: &StateKey) -> Result<bool, PersistenceError> {
        Ok(self.keys.insert(key.clone()))
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryQualityStore {
    values: HashMap<StateKey, Quality>,
}

impl MemoryQualityStore {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl QualityStore for MemoryQualityStore {
    fn get(&self, key: &StateKey) -> Result<Option<Quality>, PersistenceError> {
        Ok(self.values.get(key).copied())
    }

    fn put(&mut self, key: &StateKey, quality: Quality) -> Result<(), PersistenceError> {
        self.values.insert(key.clone(), quality);
        Ok(())
    }
}

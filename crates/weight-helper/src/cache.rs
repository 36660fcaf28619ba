//! Per-entity caches for fetched metadata and previews.

use std::collections::HashMap;

use weight_helper_core::{BlockType, ModelFamily};

use crate::fetch::{BlockRestriction, Metadata};

/// What a previous context learned about an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    /// `None` when the fetch never completed.
    pub metadata: Option<Metadata>,
    pub family: ModelFamily,
    pub block_type: BlockType,
    pub restriction: BlockRestriction,
}

#[derive(Debug, Clone)]
pub struct EntityCache<T> {
    entries: HashMap<String, T>,
}

impl<T> Default for EntityCache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> EntityCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: &str) -> Option<&T> {
        self.entries.get(entity)
    }

    pub fn insert(&mut self, entity: &str, value: T) {
        self.entries.insert(entity.to_string(), value);
    }

    pub fn remove(&mut self, entity: &str) -> Option<T> {
        self.entries.remove(entity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Per-entity history of distinct configurations and the lock set.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::types::{BlockType, ModelFamily};

/// One remembered configuration of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Encoded params with raw block values; the identity of the entry.
    pub params: String,
    #[serde(default)]
    pub model_family: ModelFamily,
    #[serde(default)]
    pub block_type: BlockType,
}

impl HistoryEntry {
    pub fn new(params: impl Into<String>, model_family: ModelFamily, block_type: BlockType) -> Self {
        Self {
            params: params.into(),
            model_family,
            block_type,
        }
    }
}

/// Flat form of a [`Ledger`] for persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub histories: IndexMap<String, Vec<HistoryEntry>>,
    #[serde(default)]
    pub locks: IndexMap<String, Vec<String>>,
}

/// History lists and lock sets keyed by entity name.
///
/// A history list holds distinct `params` ordered by recency: re-adding an
/// existing configuration moves it to the tail. Locks are independent of the
/// history and survive [`Ledger::clear_histories`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    histories: IndexMap<String, Vec<HistoryEntry>>,
    locks: IndexMap<String, IndexSet<String>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let mut ledger = Self::new();
        ledger.merge(snapshot);
        ledger
    }

    /// Appends `entry`, first removing any entry with the same params.
    pub fn add_history(&mut self, name: &str, entry: HistoryEntry) {
        let list = self.histories.entry(name.to_string()).or_default();
        list.retain(|e| e.params != entry.params);
        list.push(entry);
    }

    /// History of `name`, oldest first. Empty when the entity has none.
    pub fn histories(&self, name: &str) -> &[HistoryEntry] {
        self.histories.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest(&self, name: &str) -> Option<&HistoryEntry> {
        self.histories(name).last()
    }

    /// Drops every unlocked entry of `name`.
    pub fn clear_histories(&mut self, name: &str) {
        let locks = self.locks.get(name);
        let Some(list) = self.histories.get_mut(name) else {
            return;
        };
        list.retain(|e| locks.is_some_and(|set| set.contains(&e.params)));
        if list.is_empty() {
            self.histories.shift_remove(name);
        }
    }

    pub fn add_lock(&mut self, name: &str, params: &str) {
        self.locks
            .entry(name.to_string())
            .or_default()
            .insert(params.to_string());
    }

    pub fn remove_lock(&mut self, name: &str, params: &str) {
        if let Some(set) = self.locks.get_mut(name) {
            set.shift_remove(params);
            if set.is_empty() {
                self.locks.shift_remove(name);
            }
        }
    }

    pub fn is_locked(&self, name: &str, params: &str) -> bool {
        self.locks.get(name).is_some_and(|set| set.contains(params))
    }

    pub fn locks(&self, name: &str) -> impl Iterator<Item = &str> {
        self.locks
            .get(name)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            histories: self.histories.clone(),
            locks: self
                .locks
                .iter()
                .map(|(name, set)| (name.clone(), set.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Folds a loaded snapshot into this ledger.
    ///
    /// Loaded entries are replayed first and the in-memory ones after them,
    /// so in-memory configurations stay the most recent. Lock sets are
    /// unioned.
    pub fn merge(&mut self, snapshot: LedgerSnapshot) {
        for (name, loaded) in snapshot.histories {
            let current = self.histories.shift_remove(&name).unwrap_or_default();
            for entry in loaded.into_iter().chain(current) {
                self.add_history(&name, entry);
            }
        }
        for (name, params) in snapshot.locks {
            for p in params {
                self.add_lock(&name, &p);
            }
        }
    }
}

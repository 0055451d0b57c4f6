//! Bidirectional id ↔ name caches for concepts and categories.
//!
//! Unbounded, loaded once at startup, and replaced wholesale after a
//! concept index rebuild: readers hold a snapshot handle, and a reload is
//! an atomic swap of the inner map set. Name lookups are case-insensitive.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct IdMaps {
    by_id: HashMap<u32, String>,
    by_name: HashMap<String, u32>,
}

impl IdMaps {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, String)>) -> Self {
        let mut maps = IdMaps::default();
        for (id, name) in pairs {
            maps.by_name.insert(name.to_lowercase(), id);
            maps.by_id.insert(id, name);
        }
        maps
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

pub struct IdNameCache {
    inner: RwLock<Arc<IdMaps>>,
}

impl IdNameCache {
    pub fn empty() -> Self {
        Self { inner: RwLock::new(Arc::new(IdMaps::default())) }
    }

    /// Swap-on-ready: the new map set is fully built before replacing the
    /// handle, so readers see either the old or the new state, never a mix.
    pub fn swap(&self, pairs: impl IntoIterator<Item = (u32, String)>) {
        let fresh = Arc::new(IdMaps::from_pairs(pairs));
        *self.inner.write() = fresh;
    }

    /// Snapshot handle for read-mostly consumers (one per query).
    pub fn snapshot(&self) -> Arc<IdMaps> {
        self.inner.read().clone()
    }

    pub fn name_of(&self, id: u32) -> Option<String> {
        self.inner.read().name_of(id).map(String::from)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.inner.read().id_of(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Resolve a list of ids to their names, skipping unknown ids.
    pub fn names_of(&self, ids: &[u32]) -> Vec<String> {
        let snapshot = self.snapshot();
        ids.iter()
            .filter_map(|id| snapshot.name_of(*id).map(String::from))
            .collect()
    }
}

impl Default for IdNameCache {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_bidirectional_and_case_insensitive() {
        let cache = IdNameCache::empty();
        cache.swap(vec![(1, "Dependency Injection".to_string()), (2, "Event Sourcing".to_string())]);

        assert_eq!(cache.name_of(1).as_deref(), Some("Dependency Injection"));
        assert_eq!(cache.id_of("dependency injection"), Some(1));
        assert_eq!(cache.id_of("DEPENDENCY INJECTION"), Some(1));
        assert_eq!(cache.id_of("missing"), None);
    }

    #[test]
    fn swap_replaces_the_whole_map_set() {
        let cache = IdNameCache::empty();
        cache.swap(vec![(1, "Old".to_string())]);
        let before = cache.snapshot();

        cache.swap(vec![(2, "New".to_string())]);
        assert_eq!(cache.name_of(1), None);
        assert_eq!(cache.name_of(2).as_deref(), Some("New"));

        // Readers holding the old snapshot still see the old state.
        assert_eq!(before.name_of(1), Some("Old"));
    }

    #[test]
    fn names_of_skips_unknown_ids() {
        let cache = IdNameCache::empty();
        cache.swap(vec![(1, "Alpha".to_string())]);
        assert_eq!(cache.names_of(&[1, 99]), vec!["Alpha".to_string()]);
    }
}

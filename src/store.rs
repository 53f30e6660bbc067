//! Entry storage owned by a single resource.
//!
//! The store is plain synchronous data: the owning resource keeps it behind a
//! mutex and never holds that mutex across an await point, so every mutation
//! below is atomic with respect to other tasks.
//!
//! Writes carry a logical stamp. Fetch results carry the stamp allocated when the
//! fetch *started*; direct writes and deletes allocate a fresh one. A fetch
//! result only touches a key whose current stamp is older than the fetch, which
//! makes the most recent logical write win regardless of completion order.
//!
//! `mark_outdated` stamps too. A fetch that started before the latest outdate of
//! a key still writes its value but leaves the key outdated.

use crate::entity::ResourceEntity;
use crate::key::ResourceKey;
use crate::loader::Includes;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A cached entity plus its metadata.
#[derive(Clone, Debug)]
pub struct StoredEntry<T> {
    pub value: T,
    pub outdated: bool,
    pub includes: Includes,
    pub stamp: u64,
    /// Stamp of the latest `mark_outdated` touching this entry.
    pub outdated_at: u64,
    pub updated_at: Instant,
}

impl<T> StoredEntry<T> {
    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.duration_since(self.updated_at) > ttl)
    }
}

/// What a write did to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    /// A newer write already owns the key.
    Superseded,
}

/// Store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_entries: usize,
    pub outdated_entries: usize,
    pub tombstones: usize,
    pub all_loaded: bool,
}

/// Map of entries for one resource, in insertion order.
pub struct ResourceStore<T: ResourceEntity> {
    entries: HashMap<T::Key, StoredEntry<T>>,
    order: Vec<T::Key>,
    tombstones: HashMap<T::Key, u64>,
    /// Outdate stamps of keys that were absent when marked.
    pending_outdates: HashMap<T::Key, u64>,
    all_loaded: bool,
    all_outdated: bool,
    all_outdated_at: u64,
    all_includes: Includes,
    all_loaded_at: Option<Instant>,
    next_stamp: u64,
}

impl<T: ResourceEntity> ResourceStore<T> {
    pub fn new() -> Self {
        ResourceStore {
            entries: HashMap::new(),
            order: Vec::new(),
            tombstones: HashMap::new(),
            pending_outdates: HashMap::new(),
            all_loaded: false,
            all_outdated: false,
            all_outdated_at: 0,
            all_includes: Includes::none(),
            all_loaded_at: None,
            next_stamp: 0,
        }
    }

    /// Allocate the next logical stamp.
    pub fn next_stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    pub fn get(&self, key: &T::Key) -> Option<&StoredEntry<T>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<T::Key> {
        self.order.clone()
    }

    pub fn values(&self) -> Vec<T> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .map(|entry| entry.value.clone())
            .collect()
    }

    /// Values for the selected keys, skipping absent ones.
    pub fn select(&self, key: &ResourceKey<T::Key>) -> Vec<T> {
        match key {
            ResourceKey::All => self.values(),
            selector => selector
                .keys()
                .iter()
                .filter_map(|k| self.entries.get(k))
                .map(|entry| entry.value.clone())
                .collect(),
        }
    }

    /// Latest stamp known for a key, from its entry or its tombstone.
    pub fn stamp_of(&self, key: &T::Key) -> u64 {
        let entry = self.entries.get(key).map_or(0, |entry| entry.stamp);
        let tombstone = self.tombstones.get(key).copied().unwrap_or(0);
        entry.max(tombstone)
    }

    /// Stamp of the latest outdate that applies to `key`.
    pub fn outdated_since(&self, key: &T::Key) -> u64 {
        let own = match self.entries.get(key) {
            Some(entry) => entry.outdated_at,
            None => self.pending_outdates.get(key).copied().unwrap_or(0),
        };
        own.max(self.all_outdated_at)
    }

    /// Stamp of the latest outdate anywhere in the collection.
    pub fn latest_outdate(&self) -> u64 {
        self.entries
            .values()
            .map(|entry| entry.outdated_at)
            .chain(self.pending_outdates.values().copied())
            .fold(self.all_outdated_at, u64::max)
    }

    pub fn all_loaded(&self) -> bool {
        self.all_loaded
    }

    /// Write a value merged onto any existing entry.
    ///
    /// Fetch results pass their start stamp and are dropped when a newer write
    /// owns the key; direct writes pass a fresh stamp and always apply. A write
    /// older than the key's latest outdate keeps the key outdated.
    pub fn write(&mut self, value: T, stamp: u64, includes: Option<&Includes>) -> WriteOutcome {
        let key = value.resource_key();
        if self.stamp_of(&key) > stamp {
            return WriteOutcome::Superseded;
        }
        let outdated_at = self.outdated_since(&key);
        let outdated = stamp < outdated_at;
        self.tombstones.remove(&key);
        self.pending_outdates.remove(&key);

        let now = Instant::now();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.value = merge_or_replace(&entry.value, value);
                entry.outdated = outdated;
                entry.outdated_at = outdated_at;
                entry.stamp = stamp;
                entry.updated_at = now;
                if let Some(includes) = includes {
                    entry.includes = includes.clone();
                }
                WriteOutcome::Updated
            }
            None => {
                self.order.push(key.clone());
                self.entries.insert(
                    key,
                    StoredEntry {
                        value,
                        outdated,
                        includes: includes.cloned().unwrap_or_default(),
                        stamp,
                        outdated_at,
                        updated_at: now,
                    },
                );
                WriteOutcome::Inserted
            }
        }
    }

    /// Replace an entry's value without merging (used after a patch).
    pub fn replace(&mut self, value: T, stamp: u64) -> bool {
        let key = value.resource_key();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.value = value;
                entry.stamp = stamp;
                entry.updated_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove an entry unconditionally, leaving a tombstone at `stamp`.
    pub fn remove(&mut self, key: &T::Key, stamp: u64) -> Option<T> {
        self.tombstones.insert(key.clone(), stamp);
        self.take(key)
    }

    /// Remove an entry only if no write newer than `stamp` owns it.
    pub fn remove_if_older(&mut self, key: &T::Key, stamp: u64) -> Option<T> {
        if self.stamp_of(key) > stamp {
            return None;
        }
        self.remove(key, stamp)
    }

    /// Drop every entry and forget that the collection was loaded.
    pub fn clear(&mut self, stamp: u64) -> Vec<T::Key> {
        let keys = std::mem::take(&mut self.order);
        for key in &keys {
            self.tombstones.insert(key.clone(), stamp);
        }
        self.entries.clear();
        self.pending_outdates.clear();
        self.all_loaded = false;
        self.all_outdated = false;
        self.all_loaded_at = None;
        keys
    }

    fn take(&mut self, key: &T::Key) -> Option<T> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry.value)
    }

    /// Record that the complete collection was loaded by a fetch started at
    /// `stamp`. The collection stays outdated if it was outdated after that.
    pub fn mark_all_loaded(&mut self, includes: &Includes, stamp: u64) {
        self.all_loaded = true;
        self.all_outdated = stamp < self.all_outdated_at;
        self.all_includes = includes.clone();
        self.all_loaded_at = Some(Instant::now());
    }

    /// Flag selected entries as outdated. Returns the keys that were flagged.
    ///
    /// Absent keys are not flagged, but their outdate is remembered so a fetch
    /// already running for them cannot make them current.
    pub fn mark_outdated(&mut self, key: &ResourceKey<T::Key>) -> Vec<T::Key> {
        let stamp = self.next_stamp();
        match key {
            ResourceKey::All => {
                self.all_outdated = true;
                self.all_outdated_at = stamp;
                for entry in self.entries.values_mut() {
                    entry.outdated = true;
                    entry.outdated_at = stamp;
                }
                self.order.clone()
            }
            selector => {
                let mut flagged = Vec::new();
                for k in selector.keys() {
                    match self.entries.get_mut(&k) {
                        Some(entry) => {
                            entry.outdated = true;
                            entry.outdated_at = stamp;
                            flagged.push(k);
                        }
                        None => {
                            self.pending_outdates.insert(k, stamp);
                        }
                    }
                }
                flagged
            }
        }
    }

    /// Whether the selector has been loaded at least once.
    pub fn is_loaded(&self, key: &ResourceKey<T::Key>) -> bool {
        match key {
            ResourceKey::All => self.all_loaded,
            selector => selector
                .keys()
                .iter()
                .all(|k| self.all_loaded || self.entries.contains_key(k)),
        }
    }

    /// Whether any selected entry is flagged outdated.
    pub fn is_outdated(&self, key: &ResourceKey<T::Key>) -> bool {
        match key {
            ResourceKey::All => self.all_outdated || self.entries.values().any(|e| e.outdated),
            selector => selector
                .keys()
                .iter()
                .any(|k| self.entries.get(k).is_some_and(|e| e.outdated)),
        }
    }

    /// Keys of the selector that must be fetched to satisfy a load.
    ///
    /// For `All` the answer is all-or-nothing: `Some(All)` or `None`.
    pub fn needs_fetch(
        &self,
        key: &ResourceKey<T::Key>,
        includes: &Includes,
        ttl: Option<Duration>,
    ) -> Option<ResourceKey<T::Key>> {
        let now = Instant::now();
        match key {
            ResourceKey::All => {
                let expired = match (ttl, self.all_loaded_at) {
                    (Some(ttl), Some(at)) => now.duration_since(at) > ttl,
                    _ => false,
                };
                let stale = !self.all_loaded
                    || self.all_outdated
                    || expired
                    || !self.all_includes.is_superset(includes)
                    || self
                        .entries
                        .values()
                        .any(|e| e.outdated || !e.includes.is_superset(includes));
                stale.then_some(ResourceKey::All)
            }
            selector => {
                let missing: Vec<T::Key> = selector
                    .keys()
                    .into_iter()
                    .filter(|k| match self.entries.get(k) {
                        Some(entry) => {
                            entry.outdated
                                || entry.is_expired(ttl, now)
                                || !entry.includes.is_superset(includes)
                        }
                        // A loaded, current collection proves the key does not exist.
                        None => !(self.all_loaded && !self.all_outdated),
                    })
                    .collect();
                match missing.len() {
                    0 => None,
                    1 if matches!(selector, ResourceKey::Key(_)) => {
                        missing.into_iter().next().map(ResourceKey::Key)
                    }
                    _ => Some(ResourceKey::List(missing)),
                }
            }
        }
    }

    /// Forget tombstones and pending outdates that no running fetch can race.
    ///
    /// `oldest_fetch` is the start stamp of the oldest fetch in flight; only
    /// marks newer than it still matter.
    pub fn prune(&mut self, oldest_fetch: Option<u64>) {
        match oldest_fetch {
            Some(oldest) => {
                self.tombstones.retain(|_, stamp| *stamp > oldest);
                self.pending_outdates.retain(|_, stamp| *stamp > oldest);
            }
            None => {
                self.tombstones.clear();
                self.pending_outdates.clear();
            }
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total_entries: self.entries.len(),
            outdated_entries: self.entries.values().filter(|e| e.outdated).count(),
            tombstones: self.tombstones.len(),
            all_loaded: self.all_loaded,
        }
    }
}

impl<T: ResourceEntity> Default for ResourceStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_or_replace<T: ResourceEntity>(current: &T, incoming: T) -> T {
    match current.merge_from(&incoming) {
        Ok(merged) => merged,
        Err(e) => {
            warn!(
                "⚠ Merge failed for {}:{}, replacing entry: {}",
                T::resource_prefix(),
                incoming.resource_key(),
                e
            );
            incoming
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct TestEntity {
        id: String,
        name: Option<String>,
        note: Option<String>,
    }

    impl ResourceEntity for TestEntity {
        type Key = String;

        fn resource_key(&self) -> Self::Key {
            self.id.clone()
        }

        fn resource_prefix() -> &'static str {
            "test"
        }
    }

    fn entity(id: &str, name: Option<&str>, note: Option<&str>) -> TestEntity {
        TestEntity {
            id: id.to_string(),
            name: name.map(str::to_string),
            note: note.map(str::to_string),
        }
    }

    #[test]
    fn test_write_merges_onto_existing() {
        let mut store = ResourceStore::new();
        let s1 = store.next_stamp();
        assert_eq!(
            store.write(entity("a", Some("A"), Some("n")), s1, None),
            WriteOutcome::Inserted
        );
        let s2 = store.next_stamp();
        assert_eq!(
            store.write(entity("a", Some("A2"), None), s2, None),
            WriteOutcome::Updated
        );

        let entry = store.get(&"a".to_string()).expect("entry should exist");
        assert_eq!(entry.value.name.as_deref(), Some("A2"));
        assert_eq!(entry.value.note.as_deref(), Some("n"));
        assert_eq!(entry.stamp, s2);
    }

    #[test]
    fn test_older_fetch_is_superseded_by_newer_write() {
        let mut store = ResourceStore::new();
        let fetch_stamp = store.next_stamp();
        let write_stamp = store.next_stamp();
        store.write(entity("a", Some("new"), None), write_stamp, None);

        let outcome = store.write(entity("a", Some("old"), None), fetch_stamp, None);
        assert_eq!(outcome, WriteOutcome::Superseded);
        assert_eq!(
            store.get(&"a".to_string()).and_then(|e| e.value.name.clone()),
            Some("new".to_string())
        );
    }

    #[test]
    fn test_tombstone_blocks_older_fetch() {
        let mut store = ResourceStore::new();
        let fetch_stamp = store.next_stamp();
        let delete_stamp = store.next_stamp();
        store.remove(&"a".to_string(), delete_stamp);

        let outcome = store.write(entity("a", None, None), fetch_stamp, None);
        assert_eq!(outcome, WriteOutcome::Superseded);
        assert!(!store.contains(&"a".to_string()));

        store.prune(None);
        assert_eq!(store.stamp_of(&"a".to_string()), 0);
    }

    #[test]
    fn test_mark_outdated_and_needs_fetch() {
        let mut store = ResourceStore::new();
        let stamp = store.next_stamp();
        store.write(entity("a", None, None), stamp, Some(&Includes::none()));

        let key = ResourceKey::Key("a".to_string());
        assert_eq!(store.needs_fetch(&key, &Includes::none(), None), None);

        assert_eq!(store.mark_outdated(&key), vec!["a".to_string()]);
        assert_eq!(
            store.needs_fetch(&key, &Includes::none(), None),
            Some(key.clone())
        );
        assert!(store.is_outdated(&key));
    }

    #[test]
    fn test_needs_fetch_for_wider_includes() {
        let mut store = ResourceStore::new();
        let stamp = store.next_stamp();
        store.write(entity("a", None, None), stamp, Some(&Includes::none()));

        let key = ResourceKey::Key("a".to_string());
        assert!(store
            .needs_fetch(&key, &Includes::of(["note"]), None)
            .is_some());
    }

    #[test]
    fn test_list_fetch_only_missing_keys() {
        let mut store = ResourceStore::new();
        let stamp = store.next_stamp();
        store.write(entity("a", None, None), stamp, None);

        let key = ResourceKey::list(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(
            store.needs_fetch(&key, &Includes::none(), None),
            Some(ResourceKey::List(vec!["b".to_string(), "c".to_string()]))
        );
    }

    #[test]
    fn test_fetch_started_before_outdate_keeps_entry_outdated() {
        let mut store = ResourceStore::new();
        let stamp = store.next_stamp();
        store.write(entity("a", Some("v1"), None), stamp, None);

        let fetch_stamp = store.next_stamp();
        let key = ResourceKey::Key("a".to_string());
        store.mark_outdated(&key);
        assert!(store.outdated_since(&"a".to_string()) > fetch_stamp);

        store.write(entity("a", Some("v1"), None), fetch_stamp, None);
        assert!(store.is_outdated(&key));

        let newer = store.next_stamp();
        store.write(entity("a", Some("v2"), None), newer, None);
        assert!(!store.is_outdated(&key));
    }

    #[test]
    fn test_outdate_of_absent_key_applies_to_running_fetch() {
        let mut store = ResourceStore::new();
        let fetch_stamp = store.next_stamp();
        let key = ResourceKey::Key("a".to_string());
        assert!(store.mark_outdated(&key).is_empty());

        store.write(entity("a", None, None), fetch_stamp, None);
        assert!(store.is_outdated(&key));
    }

    #[test]
    fn test_all_outdated_during_all_fetch_stays_outdated() {
        let mut store: ResourceStore<TestEntity> = ResourceStore::new();
        let fetch_stamp = store.next_stamp();
        store.mark_outdated(&ResourceKey::All);

        store.mark_all_loaded(&Includes::none(), fetch_stamp);
        assert!(store.is_outdated(&ResourceKey::All));
        assert!(store
            .needs_fetch(&ResourceKey::All, &Includes::none(), None)
            .is_some());
    }

    #[test]
    fn test_prune_keeps_marks_newer_than_oldest_fetch() {
        let mut store: ResourceStore<TestEntity> = ResourceStore::new();
        let old = store.next_stamp();
        store.remove(&"a".to_string(), old);
        let running = store.next_stamp();
        let newer = store.next_stamp();
        store.remove(&"b".to_string(), newer);

        store.prune(Some(running));
        assert_eq!(store.stamp_of(&"a".to_string()), 0);
        assert_eq!(store.stamp_of(&"b".to_string()), newer);
        assert_eq!(store.stats().tombstones, 1);
    }

    #[test]
    fn test_absent_key_known_after_all_loaded() {
        let mut store: ResourceStore<TestEntity> = ResourceStore::new();
        let stamp = store.next_stamp();
        store.mark_all_loaded(&Includes::none(), stamp);

        let key = ResourceKey::Key("ghost".to_string());
        assert_eq!(store.needs_fetch(&key, &Includes::none(), None), None);
        assert!(store.is_loaded(&key));

        store.mark_outdated(&ResourceKey::All);
        assert!(store.needs_fetch(&key, &Includes::none(), None).is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let mut store = ResourceStore::new();
        let stamp = store.next_stamp();
        store.write(entity("a", None, None), stamp, None);

        let key = ResourceKey::Key("a".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert!(store
            .needs_fetch(&key, &Includes::none(), Some(Duration::from_millis(1)))
            .is_some());
        assert_eq!(
            store.needs_fetch(&key, &Includes::none(), Some(Duration::from_secs(3600))),
            None
        );
    }

    #[test]
    fn test_values_keep_insertion_order_and_stats() {
        let mut store = ResourceStore::new();
        for id in ["c", "a", "b"] {
            let stamp = store.next_stamp();
            store.write(entity(id, None, None), stamp, None);
        }
        let stamp = store.next_stamp();
        store.remove(&"a".to_string(), stamp);

        let ids: Vec<String> = store.values().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["c".to_string(), "b".to_string()]);

        let stats = store.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.tombstones, 1);
        assert!(!stats.all_loaded);
    }
}

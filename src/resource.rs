//! Cached map resource - main entry point for resource operations.
//!
//! A [`CachedMapResource`] mediates one entity type between consumers and a
//! remote source. It owns the only copy of its entries, fetches through its
//! [`ResourceLoader`], coalesces concurrent fetches for overlapping keys, and
//! notifies dependents through [`Executor`]s after every mutation.
//!
//! # Example
//!
//! ```ignore
//! use resource_kit::{CachedMapResource, InMemoryLoader, ResourceKey};
//!
//! let loader = InMemoryLoader::new();
//! let connections = CachedMapResource::new(loader);
//!
//! connections.on_item_delete().add_handler(|key| println!("gone: {}", key));
//!
//! let all = connections.load_all().await?;
//! let one = connections.get(&"c1".to_string());
//! connections.mark_outdated(ResourceKey::All);
//! ```
//!
//! # Runtime
//!
//! Fetches are spawned with `tokio::spawn`, so `load`/`refresh` must be called
//! from within a tokio runtime. A spawned fetch always settles and merges its
//! result, even when every caller dropped its future.

use crate::entity::ResourceEntity;
use crate::error::{Error, Result};
use crate::executor::{Executor, HandlerId};
use crate::key::{KeyBuilder, ResourceKey};
use crate::loader::{Includes, LoadRequest, LoadResult, ResourceLoader};
use crate::observability::{NoOpMetrics, ResourceMetrics, TtlPolicy};
use crate::serialization::{decode_envelope, encode_envelope, ResourceSnapshot, SnapshotHeader};
use crate::store::{ResourceStore, StoreStats, WriteOutcome};
use crate::strategy::{EntryInfo, ResourceStrategy};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

type SharedFetch = Shared<BoxFuture<'static, Result<()>>>;

/// Resource-wide configuration.
///
/// # Example
///
/// ```ignore
/// let config = ResourceConfig::default()
///     .with_retry(2)
///     .with_retry_delay(Duration::from_millis(50))
///     .with_ttl_policy(TtlPolicy::Fixed(Duration::from_secs(300)));
///
/// let drivers = CachedMapResource::with_config(loader, config);
/// ```
#[derive(Clone)]
pub struct ResourceConfig {
    /// Number of loader retries after a failure (0 = no retry).
    pub retry_count: u32,

    /// Base delay of the exponential retry backoff.
    pub retry_delay: Duration,

    pub ttl_policy: TtlPolicy,

    pub metrics: Arc<dyn ResourceMetrics>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        ResourceConfig {
            retry_count: 0,
            retry_delay: Duration::from_millis(100),
            ttl_policy: TtlPolicy::default(),
            metrics: Arc::new(NoOpMetrics),
        }
    }
}

impl ResourceConfig {
    pub fn with_retry(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl_policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn ResourceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// A precondition checked before every fetch of a resource.
///
/// Used for permission gating: the loader only runs when every requirement
/// resolves to `Ok`.
pub trait Requirement: Send + Sync {
    /// Human readable name used in logs.
    fn describe(&self) -> String;

    fn ensure(&self) -> BoxFuture<'static, Result<()>>;
}

/// Payload of `on_data_error` notifications.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceError<K> {
    pub key: ResourceKey<K>,
    pub error: Error,
}

struct InFlight<K> {
    id: u64,
    stamp: u64,
    key: ResourceKey<K>,
    includes: Includes,
    fetch: SharedFetch,
}

struct State<T: ResourceEntity> {
    store: ResourceStore<T>,
    in_flight: Vec<InFlight<T::Key>>,
    updating: Vec<(u64, ResourceKey<T::Key>)>,
    /// Per-key outcome of the latest fetch or update, ordered by operation id.
    /// `None` records a success that overrides an older collection error.
    exceptions: HashMap<T::Key, (u64, Option<Error>)>,
    all_exception: Option<(u64, Error)>,
    next_op_id: u64,
}

impl<T: ResourceEntity> State<T> {
    fn next_op_id(&mut self) -> u64 {
        self.next_op_id += 1;
        self.next_op_id
    }

    fn finish_fetch(&mut self, id: u64) {
        self.in_flight.retain(|f| f.id != id);
        self.prune();
    }

    /// Drop store marks older than every fetch still in flight.
    fn prune(&mut self) {
        let oldest = self.in_flight.iter().map(|f| f.stamp).min();
        self.store.prune(oldest);
    }

    fn record_exception(&mut self, key: &ResourceKey<T::Key>, error: &Error) {
        let seq = self.next_op_id();
        match key {
            ResourceKey::All => self.all_exception = Some((seq, error.clone())),
            selector => {
                for k in selector.keys() {
                    self.exceptions.insert(k, (seq, Some(error.clone())));
                }
            }
        }
    }

    fn clear_exception(&mut self, key: &T::Key) {
        if self.all_exception.is_some() {
            let seq = self.next_op_id();
            self.exceptions.insert(key.clone(), (seq, None));
        } else {
            self.exceptions.remove(key);
        }
    }

    /// The most recent outcome wins between the key's own and the collection's.
    fn exception(&self, key: &T::Key) -> Option<Error> {
        match (self.exceptions.get(key), &self.all_exception) {
            (Some((seq, own)), Some((all_seq, _))) if seq > all_seq => own.clone(),
            (_, Some((_, error))) => Some(error.clone()),
            (Some((_, own)), None) => own.clone(),
            (None, None) => None,
        }
    }
}

struct Inner<T: ResourceEntity, L> {
    loader: L,
    config: ResourceConfig,
    state: Mutex<State<T>>,
    requirements: Mutex<Vec<Arc<dyn Requirement>>>,
    on_item_add: Executor<ResourceKey<T::Key>>,
    on_item_delete: Executor<ResourceKey<T::Key>>,
    on_data_outdated: Executor<ResourceKey<T::Key>>,
    on_data_update: Executor<ResourceKey<T::Key>>,
    on_data_error: Executor<ResourceError<T::Key>>,
}

impl<T: ResourceEntity, L> Inner<T, L> {
    fn lock_state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn label(&self, key: &ResourceKey<T::Key>) -> String {
        KeyBuilder::build(T::resource_prefix(), key)
    }
}

/// Removes a fetch from the in-flight table however its task ends.
struct FetchGuard<T: ResourceEntity, L> {
    inner: Arc<Inner<T, L>>,
    id: u64,
}

impl<T: ResourceEntity, L> Drop for FetchGuard<T, L> {
    fn drop(&mut self) {
        self.inner.lock_state().finish_fetch(self.id);
    }
}

/// Clears the "updating" mark of a `perform_update` call, even if it is dropped.
struct UpdateGuard<'a, T: ResourceEntity, L> {
    inner: &'a Inner<T, L>,
    id: u64,
}

impl<T: ResourceEntity, L> Drop for UpdateGuard<'_, T, L> {
    fn drop(&mut self) {
        self.inner
            .lock_state()
            .updating
            .retain(|(id, _)| *id != self.id);
    }
}

/// Keyed resource cache with request coalescing and incremental invalidation.
///
/// Cloning is cheap and every clone shares the same entries.
pub struct CachedMapResource<T: ResourceEntity, L> {
    inner: Arc<Inner<T, L>>,
}

impl<T: ResourceEntity, L> Clone for CachedMapResource<T, L> {
    fn clone(&self) -> Self {
        CachedMapResource {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Weak handle used for back-references from handlers of other resources.
pub struct WeakResource<T: ResourceEntity, L> {
    inner: Weak<Inner<T, L>>,
}

impl<T: ResourceEntity, L> Clone for WeakResource<T, L> {
    fn clone(&self) -> Self {
        WeakResource {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: ResourceEntity, L> WeakResource<T, L> {
    pub fn upgrade(&self) -> Option<CachedMapResource<T, L>> {
        self.inner
            .upgrade()
            .map(|inner| CachedMapResource { inner })
    }
}

impl<T: ResourceEntity, L: ResourceLoader<T>> CachedMapResource<T, L> {
    /// Create a resource with default configuration.
    pub fn new(loader: L) -> Self {
        Self::with_config(loader, ResourceConfig::default())
    }

    pub fn with_config(loader: L, config: ResourceConfig) -> Self {
        CachedMapResource {
            inner: Arc::new(Inner {
                loader,
                config,
                state: Mutex::new(State {
                    store: ResourceStore::new(),
                    in_flight: Vec::new(),
                    updating: Vec::new(),
                    exceptions: HashMap::new(),
                    all_exception: None,
                    next_op_id: 0,
                }),
                requirements: Mutex::new(Vec::new()),
                on_item_add: Executor::new(),
                on_item_delete: Executor::new(),
                on_data_outdated: Executor::new(),
                on_data_update: Executor::new(),
                on_data_error: Executor::new(),
            }),
        }
    }

    pub fn loader(&self) -> &L {
        &self.inner.loader
    }

    pub fn downgrade(&self) -> WeakResource<T, L> {
        WeakResource {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Fired with the written keys after entries are inserted or updated.
    pub fn on_item_add(&self) -> &Executor<ResourceKey<T::Key>> {
        &self.inner.on_item_add
    }

    /// Fired with the removed keys after entries are deleted.
    pub fn on_item_delete(&self) -> &Executor<ResourceKey<T::Key>> {
        &self.inner.on_item_delete
    }

    pub fn on_data_outdated(&self) -> &Executor<ResourceKey<T::Key>> {
        &self.inner.on_data_outdated
    }

    /// Fired with the requested selector after a fetch completed.
    pub fn on_data_update(&self) -> &Executor<ResourceKey<T::Key>> {
        &self.inner.on_data_update
    }

    pub fn on_data_error(&self) -> &Executor<ResourceError<T::Key>> {
        &self.inner.on_data_error
    }

    // ------------------------------------------------------------------
    // Pure reads
    // ------------------------------------------------------------------

    /// Cached value for `key`. Never fetches.
    pub fn get(&self, key: &T::Key) -> Option<T> {
        self.inner
            .lock_state()
            .store
            .get(key)
            .map(|entry| entry.value.clone())
    }

    /// Cached values for the selector, skipping absent keys. Never fetches.
    pub fn get_many(&self, key: &ResourceKey<T::Key>) -> Vec<T> {
        self.inner.lock_state().store.select(key)
    }

    pub fn has(&self, key: &T::Key) -> bool {
        self.inner.lock_state().store.contains(key)
    }

    /// All cached values in insertion order.
    pub fn values(&self) -> Vec<T> {
        self.inner.lock_state().store.values()
    }

    pub fn keys(&self) -> Vec<T::Key> {
        self.inner.lock_state().store.keys()
    }

    pub fn len(&self) -> usize {
        self.inner.lock_state().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock_state().store.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.lock_state().store.stats()
    }

    pub fn is_loaded(&self, key: &ResourceKey<T::Key>) -> bool {
        self.inner.lock_state().store.is_loaded(key)
    }

    pub fn is_outdated(&self, key: &ResourceKey<T::Key>) -> bool {
        self.inner.lock_state().store.is_outdated(key)
    }

    /// Whether a fetch or an update touching the selector is in flight.
    pub fn is_loading(&self, key: &ResourceKey<T::Key>) -> bool {
        let state = self.inner.lock_state();
        state.in_flight.iter().any(|f| overlaps(&f.key, key))
            || state.updating.iter().any(|(_, k)| overlaps(k, key))
    }

    /// Last error raised for `key` (or for the whole collection).
    pub fn exception(&self, key: &T::Key) -> Option<Error> {
        self.inner.lock_state().exception(key)
    }

    pub fn info(&self, key: &T::Key) -> EntryInfo {
        let selector = ResourceKey::Key(key.clone());
        let mut info = EntryInfo::new(self.inner.label(&selector));
        info.loading = self.is_loading(&selector);
        info.exception = self.exception(key);

        let state = self.inner.lock_state();
        info.loaded = state.store.is_loaded(&selector);
        if let Some(entry) = state.store.get(key) {
            info.outdated = entry.outdated;
            info.includes = entry.includes.clone();
            info.updated_at = Some(entry.updated_at);
        }
        info
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Load one entity, fetching if absent or outdated.
    ///
    /// Returns `Ok(None)` when the remote source does not know the key.
    ///
    /// # Errors
    ///
    /// - `Error::LoaderError`: the loader failed (after configured retries)
    /// - `Error::PermissionDenied`: a requirement of the resource failed
    /// - `Error::ValidationError`: a fetched entity failed validation
    pub async fn load(&self, key: &T::Key) -> Result<Option<T>> {
        let mut values = self.load_key(ResourceKey::Key(key.clone())).await?;
        Ok(values.pop())
    }

    /// Load the complete collection.
    pub async fn load_all(&self) -> Result<Vec<T>> {
        self.load_key(ResourceKey::All).await
    }

    pub async fn load_key(&self, key: ResourceKey<T::Key>) -> Result<Vec<T>> {
        self.load_with_includes(key, Includes::none()).await
    }

    /// Load the selector, making sure `includes` were fetched for every entry.
    ///
    /// Concurrent calls for overlapping selectors share one loader call.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load). Coalesced callers all receive the error
    /// of the shared fetch.
    pub async fn load_with_includes(
        &self,
        key: ResourceKey<T::Key>,
        includes: Includes,
    ) -> Result<Vec<T>> {
        let timer = Instant::now();
        let label = self.inner.label(&key);
        debug!("» Resource operation for {} (strategy: Load)", label);

        let waits = {
            let mut state = self.inner.lock_state();
            self.plan_load(&mut state, &key, &includes)
        };

        if waits.is_empty() {
            self.inner.config.metrics.record_hit(&label, timer.elapsed());
        } else {
            futures::future::try_join_all(waits).await?;
            self.inner.config.metrics.record_miss(&label, timer.elapsed());
        }

        Ok(self.get_many(&key))
    }

    /// Unconditionally re-fetch one entity.
    pub async fn refresh(&self, key: &T::Key) -> Result<Option<T>> {
        let mut values = self.refresh_key(ResourceKey::Key(key.clone())).await?;
        Ok(values.pop())
    }

    pub async fn refresh_all(&self) -> Result<Vec<T>> {
        self.refresh_key(ResourceKey::All).await
    }

    /// Mark the selector outdated and re-fetch it.
    ///
    /// The new fetch gets a newer logical stamp than any fetch already in
    /// flight, so an older in-flight result can no longer overwrite it.
    /// Refreshing `All` resets includes to the requested ones.
    pub async fn refresh_key(&self, key: ResourceKey<T::Key>) -> Result<Vec<T>> {
        self.refresh_with_includes(key, Includes::none()).await
    }

    pub async fn refresh_with_includes(
        &self,
        key: ResourceKey<T::Key>,
        includes: Includes,
    ) -> Result<Vec<T>> {
        let timer = Instant::now();
        let label = self.inner.label(&key);
        debug!("» Resource operation for {} (strategy: Refresh)", label);

        if key.is_empty() {
            return Ok(Vec::new());
        }

        let fetch = {
            let mut state = self.inner.lock_state();
            state.store.mark_outdated(&key);
            let includes = match &key {
                ResourceKey::All => includes,
                selector => effective_includes(&state.store, selector, &includes),
            };
            self.start_fetch(&mut state, key.clone(), includes)
        };
        fetch.await?;
        self.inner.config.metrics.record_miss(&label, timer.elapsed());

        Ok(self.get_many(&key))
    }

    /// Dispatch on a [`ResourceStrategy`].
    pub async fn execute(
        &self,
        key: ResourceKey<T::Key>,
        strategy: ResourceStrategy,
    ) -> Result<Vec<T>> {
        match strategy {
            ResourceStrategy::Cached => Ok(self.get_many(&key)),
            ResourceStrategy::Load => self.load_key(key).await,
            ResourceStrategy::Refresh => self.refresh_key(key).await,
        }
    }

    /// Decide which fetches a load has to wait for, starting missing ones.
    fn plan_load(
        &self,
        state: &mut State<T>,
        key: &ResourceKey<T::Key>,
        includes: &Includes,
    ) -> Vec<SharedFetch> {
        let ttl = self
            .inner
            .config
            .ttl_policy
            .get_ttl(T::resource_prefix());
        let Some(needed) = state.store.needs_fetch(key, includes, ttl) else {
            return Vec::new();
        };

        // Only fetches started after the latest outdate can satisfy a load.

        let mut waits: Vec<(u64, SharedFetch)> = Vec::new();
        let mut uncovered: Vec<T::Key> = Vec::new();

        match &needed {
            ResourceKey::All => {
                let outdated_at = state.store.latest_outdate();
                let running = state
                    .in_flight
                    .iter()
                    .filter(|f| {
                        f.key.is_all()
                            && f.stamp > outdated_at
                            && f.includes.is_superset(includes)
                    })
                    .max_by_key(|f| f.id);
                match running {
                    Some(f) => waits.push((f.id, f.fetch.clone())),
                    None => {
                        let includes = effective_includes(&state.store, &needed, includes);
                        let fetch = self.start_fetch(state, ResourceKey::All, includes);
                        return vec![fetch];
                    }
                }
            }
            selector => {
                for k in selector.keys() {
                    let outdated_at = state.store.outdated_since(&k);
                    let running = state
                        .in_flight
                        .iter()
                        .filter(|f| {
                            f.key.includes(&k)
                                && f.stamp > outdated_at
                                && f.includes.is_superset(includes)
                        })
                        .max_by_key(|f| f.id);
                    match running {
                        Some(f) => {
                            if !waits.iter().any(|(id, _)| *id == f.id) {
                                waits.push((f.id, f.fetch.clone()));
                            }
                        }
                        None => uncovered.push(k),
                    }
                }
            }
        }

        if !waits.is_empty() {
            self.inner
                .config
                .metrics
                .record_coalesced(&self.inner.label(&needed));
        }

        let mut fetches: Vec<SharedFetch> = waits.into_iter().map(|(_, f)| f).collect();
        if !uncovered.is_empty() {
            let fetch_key = match (&needed, uncovered.len()) {
                (ResourceKey::Key(_), 1) => ResourceKey::Key(uncovered.remove(0)),
                _ => ResourceKey::List(uncovered),
            };
            let includes = effective_includes(&state.store, &fetch_key, includes);
            fetches.push(self.start_fetch(state, fetch_key, includes));
        }
        fetches
    }

    /// Register and spawn a fetch. Must be called with the state lock held.
    fn start_fetch(
        &self,
        state: &mut State<T>,
        key: ResourceKey<T::Key>,
        includes: Includes,
    ) -> SharedFetch {
        let id = state.next_op_id();
        let stamp = state.store.next_stamp();
        let request = LoadRequest::new(key.clone(), includes.clone());
        debug!(
            "Starting fetch #{} for {} (stamp {})",
            id,
            self.inner.label(&key),
            stamp
        );

        let handle = tokio::spawn(Self::run_fetch(
            Arc::clone(&self.inner),
            id,
            stamp,
            request,
        ));
        let fetch = async move { handle.await? }.boxed().shared();

        state.in_flight.push(InFlight {
            id,
            stamp,
            key,
            includes,
            fetch: fetch.clone(),
        });
        fetch
    }

    async fn run_fetch(
        inner: Arc<Inner<T, L>>,
        id: u64,
        stamp: u64,
        request: LoadRequest<T::Key>,
    ) -> Result<()> {
        let _guard = FetchGuard {
            inner: Arc::clone(&inner),
            id,
        };
        let timer = Instant::now();
        let label = inner.label(&request.key);

        let result = match Self::check_requirements(&inner).await {
            Ok(()) => Self::fetch_with_retry(&inner, &request).await,
            Err(e) => Err(e),
        };
        let result = result.and_then(|found| {
            for entity in found.values() {
                entity.validate()?;
            }
            Ok(found)
        });

        match result {
            Ok(found) => {
                let count = found.len();
                let (written, removed) = Self::apply_fetch(&inner, id, stamp, &request, found);
                inner.config.metrics.record_fetch(&label, count, timer.elapsed());
                info!(
                    "✓ Fetched {} ({} entities) in {:?}",
                    label,
                    count,
                    timer.elapsed()
                );

                if !removed.is_empty() {
                    inner.config.metrics.record_delete(&label, removed.len());
                    inner.on_item_delete.execute(&ResourceKey::List(removed));
                }
                if !written.is_empty() {
                    inner.on_item_add.execute(&ResourceKey::List(written));
                }
                inner.on_data_update.execute(&request.key);
                Ok(())
            }
            Err(error) => {
                {
                    let mut state = inner.lock_state();
                    state.finish_fetch(id);
                    state.record_exception(&request.key, &error);
                }
                inner.config.metrics.record_error(&label, &error.to_string());
                inner.on_data_error.execute(&ResourceError {
                    key: request.key.clone(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn check_requirements(inner: &Inner<T, L>) -> Result<()> {
        let requirements = inner
            .requirements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for requirement in requirements {
            if let Err(e) = requirement.ensure().await {
                debug!(
                    "Requirement {} blocked fetch of {}: {}",
                    requirement.describe(),
                    T::resource_prefix(),
                    e
                );
                return Err(e);
            }
        }
        Ok(())
    }

    async fn fetch_with_retry(
        inner: &Inner<T, L>,
        request: &LoadRequest<T::Key>,
    ) -> Result<LoadResult<T>> {
        let max_attempts = inner.config.retry_count + 1;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match inner.loader.load(request.clone()).await {
                Ok(found) => return Ok(found),
                Err(e) => {
                    if attempts >= max_attempts {
                        return Err(e);
                    }
                    debug!(
                        "Fetch of {} failed (attempt {}/{}), retrying: {}",
                        inner.label(&request.key),
                        attempts,
                        max_attempts,
                        e
                    );
                    tokio::time::sleep(retry_backoff(inner.config.retry_delay, attempts)).await;
                }
            }
        }
    }

    /// Merge a successful fetch into the store. Returns (written, removed) keys.
    fn apply_fetch(
        inner: &Inner<T, L>,
        id: u64,
        stamp: u64,
        request: &LoadRequest<T::Key>,
        found: LoadResult<T>,
    ) -> (Vec<T::Key>, Vec<T::Key>) {
        let mut state = inner.lock_state();
        let found_keys: HashSet<T::Key> = found.keys().cloned().collect();
        let mut written = Vec::new();
        let mut removed = Vec::new();

        for value in found.into_values() {
            let key = value.resource_key();
            match state.store.write(value, stamp, Some(&request.includes)) {
                WriteOutcome::Superseded => {
                    debug!("Dropped superseded result for {}", key);
                }
                _ => written.push(key),
            }
        }

        let candidates = match &request.key {
            ResourceKey::All => state.store.keys(),
            selector => selector.keys(),
        };
        for key in candidates {
            if !found_keys.contains(&key) && state.store.remove_if_older(&key, stamp).is_some() {
                removed.push(key);
            }
        }

        match &request.key {
            ResourceKey::All => {
                state.store.mark_all_loaded(&request.includes, stamp);
                state.all_exception = None;
                state.exceptions.clear();
            }
            selector => {
                for key in selector.keys() {
                    state.clear_exception(&key);
                }
            }
        }
        for key in &removed {
            state.exceptions.remove(key);
        }

        state.finish_fetch(id);
        (written, removed)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Flag the selector stale without fetching. The next `load` refetches.
    pub fn mark_outdated(&self, key: ResourceKey<T::Key>) {
        let flagged = {
            let mut state = self.inner.lock_state();
            let flagged = state.store.mark_outdated(&key);
            state.prune();
            flagged
        };
        debug!(
            "Marked {} outdated ({} entries)",
            self.inner.label(&key),
            flagged.len()
        );
        if key.is_all() || !flagged.is_empty() {
            self.inner.on_data_outdated.execute(&key);
        }
    }

    /// Write a value, merging it onto the existing entry.
    ///
    /// # Errors
    ///
    /// Returns `Error::ValidationError` if the entity fails validation; nothing
    /// is written in that case.
    pub fn set(&self, value: T) -> Result<()> {
        self.set_many(vec![value])
    }

    pub fn set_many(&self, values: Vec<T>) -> Result<()> {
        for value in &values {
            value.validate()?;
        }
        let written: Vec<T::Key> = {
            let mut state = self.inner.lock_state();
            let stamp = state.store.next_stamp();
            values
                .into_iter()
                .map(|value| {
                    let key = value.resource_key();
                    state.store.write(value, stamp, None);
                    key
                })
                .collect()
        };

        if !written.is_empty() {
            self.inner.on_item_add.execute(&ResourceKey::List(written));
        }
        Ok(())
    }

    /// Merge a partial JSON object onto an existing entry.
    ///
    /// Returns `Ok(false)` without writing when the key is not cached.
    ///
    /// # Errors
    ///
    /// Returns `Error::MergeError` when the patch does not fit the entity.
    pub fn patch(&self, key: &T::Key, patch: Value) -> Result<bool> {
        {
            let mut state = self.inner.lock_state();
            let Some(entry) = state.store.get(key) else {
                debug!(
                    "Skipping patch of absent {}:{}",
                    T::resource_prefix(),
                    key
                );
                return Ok(false);
            };
            let patched = entry.value.apply_patch(patch)?;
            patched.validate()?;
            let stamp = state.store.next_stamp();
            state.store.replace(patched, stamp);
        }

        self.inner
            .on_item_add
            .execute(&ResourceKey::Key(key.clone()));
        Ok(true)
    }

    /// Remove entries. Absent keys are skipped silently.
    ///
    /// Delete handlers run before this returns. Returns the removed keys.
    pub fn delete(&self, key: ResourceKey<T::Key>) -> Vec<T::Key> {
        let removed = {
            let mut state = self.inner.lock_state();
            let stamp = state.store.next_stamp();
            let removed = match &key {
                ResourceKey::All => {
                    state.all_exception = None;
                    state.store.clear(stamp)
                }
                selector => selector
                    .keys()
                    .into_iter()
                    .filter(|k| state.store.remove(k, stamp).is_some())
                    .collect(),
            };
            for k in &removed {
                state.exceptions.remove(k);
            }
            state.prune();
            removed
        };

        if !removed.is_empty() {
            let label = self.inner.label(&key);
            debug!("✓ Deleted {} ({} entries)", label, removed.len());
            self.inner.config.metrics.record_delete(&label, removed.len());
            self.inner
                .on_item_delete
                .execute(&ResourceKey::List(removed.clone()));
        }
        removed
    }

    /// Run a remote mutation while reporting the selector as loading.
    ///
    /// A failure is recorded as the selector's exception, announced through
    /// `on_data_error`, and returned. The cache itself is not touched; the
    /// update closure writes results with `set`/`patch`/`delete`.
    pub async fn perform_update<R, F, Fut>(&self, key: ResourceKey<T::Key>, update: F) -> Result<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let id = {
            let mut state = self.inner.lock_state();
            let id = state.next_op_id();
            state.updating.push((id, key.clone()));
            id
        };
        let guard = UpdateGuard {
            inner: &*self.inner,
            id,
        };

        let result = update().await;
        drop(guard);

        if let Err(error) = &result {
            let label = self.inner.label(&key);
            self.inner.lock_state().record_exception(&key, error);
            self.inner.config.metrics.record_error(&label, &error.to_string());
            self.inner.on_data_error.execute(&ResourceError {
                key,
                error: error.clone(),
            });
        }
        result
    }

    // ------------------------------------------------------------------
    // Dependency wiring
    // ------------------------------------------------------------------

    /// Gate every future fetch of this resource on `requirement`.
    pub fn require(&self, requirement: Arc<dyn Requirement>) {
        debug!(
            "{} now requires {}",
            T::resource_prefix(),
            requirement.describe()
        );
        self.inner
            .requirements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(requirement);
    }

    /// Outdate all of `dependent` whenever this resource is outdated.
    pub fn outdate_resource<U, M>(&self, dependent: &CachedMapResource<U, M>) -> HandlerId
    where
        U: ResourceEntity,
        M: ResourceLoader<U>,
    {
        let dependent = dependent.downgrade();
        self.inner.on_data_outdated.add_handler(move |_| {
            if let Some(dependent) = dependent.upgrade() {
                dependent.mark_outdated(ResourceKey::All);
            }
        })
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Serialize all entries into a versioned snapshot.
    pub fn export_snapshot(&self) -> Result<Vec<u8>> {
        let snapshot = {
            let state = self.inner.lock_state();
            ResourceSnapshot {
                resource: T::resource_prefix().to_string(),
                all_loaded: state.store.all_loaded(),
                entries: state.store.values(),
            }
        };
        encode_envelope(&snapshot)
    }

    /// Load entries from a snapshot as stale-but-present values.
    ///
    /// Imported entries are flagged outdated so the next `load` refetches them.
    /// Returns the number of imported entries.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidSnapshot`: bad magic or snapshot of another resource
    /// - `Error::VersionMismatch`: snapshot schema differs
    /// - `Error::DeserializationError`: corrupted payload
    pub fn import_snapshot(&self, bytes: &[u8]) -> Result<usize> {
        let header: SnapshotHeader = decode_envelope(bytes)?;
        if header.resource != T::resource_prefix() {
            warn!(
                "⚠ Rejected snapshot of {} for resource {}",
                header.resource,
                T::resource_prefix()
            );
            return Err(Error::InvalidSnapshot(format!(
                "snapshot belongs to {}, not {}",
                header.resource,
                T::resource_prefix()
            )));
        }
        let snapshot: ResourceSnapshot<T> = decode_envelope(bytes)?;

        let imported: Vec<T::Key> = {
            let mut state = self.inner.lock_state();
            let stamp = state.store.next_stamp();
            let keys: Vec<T::Key> = snapshot
                .entries
                .into_iter()
                .map(|value| {
                    let key = value.resource_key();
                    state.store.write(value, stamp, None);
                    key
                })
                .collect();
            state.store.mark_outdated(&ResourceKey::List(keys.clone()));
            keys
        };

        info!(
            "✓ Imported {} entries into {}",
            imported.len(),
            T::resource_prefix()
        );
        let count = imported.len();
        if count > 0 {
            self.inner.on_item_add.execute(&ResourceKey::List(imported));
        }
        Ok(count)
    }
}

/// Requested includes widened by what the selected entries already carry, so a
/// re-fetch never narrows an entry.
fn effective_includes<T: ResourceEntity>(
    store: &ResourceStore<T>,
    key: &ResourceKey<T::Key>,
    requested: &Includes,
) -> Includes {
    let keys = match key {
        ResourceKey::All => store.keys(),
        selector => selector.keys(),
    };
    keys.iter()
        .filter_map(|k| store.get(k))
        .fold(requested.clone(), |acc, entry| acc.union(&entry.includes))
}

/// Exponential backoff before retry number `attempt` (1-based), saturating.
fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
}

fn overlaps<K: Clone + Eq>(a: &ResourceKey<K>, b: &ResourceKey<K>) -> bool {
    match (a, b) {
        (ResourceKey::All, _) | (_, ResourceKey::All) => true,
        (a, b) => b.keys().iter().any(|k| a.includes(k)),
    }
}

//! Loader trait connecting a resource to its remote data source.
//!
//! A resource never talks to the network itself. Each concrete resource supplies
//! a [`ResourceLoader`] that receives a key selector plus the set of optional
//! fields ("includes") to fetch, and returns the entities it found keyed by
//! their resource key.
//!
//! # Mocking for Tests
//!
//! [`InMemoryLoader`] is a loader backed by a plain map with call counting,
//! injectable failures and an optional artificial delay:
//!
//! ```ignore
//! let loader = InMemoryLoader::new();
//! loader.insert(Connection { id: "c1".into(), .. });
//!
//! let resource = CachedMapResource::new(loader.clone());
//! resource.load(&"c1".to_string()).await?;
//! assert_eq!(loader.calls(), 1);
//! ```
//!
//! # Semantics
//!
//! - For `ResourceKey::Key`/`List`, a requested key missing from the result
//!   means the entity does not exist remotely and is dropped from the cache.
//! - For `ResourceKey::All`, the result is the complete collection.

use crate::entity::ResourceEntity;
use crate::error::{Error, Result};
use crate::key::ResourceKey;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Entities returned by a loader, keyed by their resource key.
pub type LoadResult<T> = HashMap<<T as ResourceEntity>::Key, T>;

/// Set of optional fields requested from the remote source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Includes(BTreeSet<String>);

impl Includes {
    /// No optional fields.
    pub fn none() -> Self {
        Includes::default()
    }

    /// Build from field names.
    pub fn of<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Includes(fields.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    /// Whether every field of `other` is also requested here.
    pub fn is_superset(&self, other: &Includes) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Union of both sets.
    pub fn union(&self, other: &Includes) -> Includes {
        Includes(self.0.union(&other.0).cloned().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// A single fetch request handed to a loader.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadRequest<K> {
    pub key: ResourceKey<K>,
    pub includes: Includes,
}

impl<K> LoadRequest<K> {
    pub fn new(key: ResourceKey<K>, includes: Includes) -> Self {
        LoadRequest { key, includes }
    }
}

/// Trait for loader implementations.
///
/// The returned future must be `Send` because fetches are spawned onto the
/// runtime and complete even when every caller stopped waiting.
///
/// # Errors
/// Return `Err` for transport or remote API failures. Absent entities are not
/// errors; leave them out of the result.
pub trait ResourceLoader<T: ResourceEntity>: Send + Sync + 'static {
    fn load(
        &self,
        request: LoadRequest<T::Key>,
    ) -> impl Future<Output = Result<LoadResult<T>>> + Send;
}

/// Loader built from a closure, see [`loader_fn`].
pub struct FnLoader<T, F> {
    f: F,
    _entity: PhantomData<fn() -> T>,
}

/// Wrap an async closure as a loader.
///
/// ```ignore
/// let resource = CachedMapResource::new(loader_fn(move |request| {
///     let api = api.clone();
///     async move { api.fetch(request).await }
/// }));
/// ```
pub fn loader_fn<T, F, Fut>(f: F) -> FnLoader<T, F>
where
    T: ResourceEntity,
    F: Fn(LoadRequest<T::Key>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<LoadResult<T>>> + Send,
{
    FnLoader {
        f,
        _entity: PhantomData,
    }
}

impl<T, F, Fut> ResourceLoader<T> for FnLoader<T, F>
where
    T: ResourceEntity,
    F: Fn(LoadRequest<T::Key>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<LoadResult<T>>> + Send,
{
    fn load(
        &self,
        request: LoadRequest<T::Key>,
    ) -> impl Future<Output = Result<LoadResult<T>>> + Send {
        (self.f)(request)
    }
}

impl<T: ResourceEntity, L: ResourceLoader<T>> ResourceLoader<T> for Arc<L> {
    fn load(
        &self,
        request: LoadRequest<T::Key>,
    ) -> impl Future<Output = Result<LoadResult<T>>> + Send {
        (**self).load(request)
    }
}

// ============================================================================
// In-Memory Test Loader
// ============================================================================

struct InMemoryState<T: ResourceEntity> {
    data: HashMap<T::Key, T>,
    failure: Option<Error>,
    delay: Option<Duration>,
    requests: Vec<LoadRequest<T::Key>>,
}

/// In-memory loader for tests.
///
/// Clones share state, so a test can keep a handle to change the "remote"
/// data, inject failures, and count calls after handing a clone to a resource.
pub struct InMemoryLoader<T: ResourceEntity> {
    state: Arc<RwLock<InMemoryState<T>>>,
    calls: Arc<AtomicUsize>,
}

impl<T: ResourceEntity> Clone for InMemoryLoader<T> {
    fn clone(&self) -> Self {
        InMemoryLoader {
            state: Arc::clone(&self.state),
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<T: ResourceEntity> InMemoryLoader<T> {
    pub fn new() -> Self {
        InMemoryLoader {
            state: Arc::new(RwLock::new(InMemoryState {
                data: HashMap::new(),
                failure: None,
                delay: None,
                requests: Vec::new(),
            })),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Insert or replace a remote entity.
    pub fn insert(&self, entity: T) {
        self.write().data.insert(entity.resource_key(), entity);
    }

    /// Remove a remote entity.
    pub fn remove(&self, key: &T::Key) -> Option<T> {
        self.write().data.remove(key)
    }

    /// Make every following load fail with `error` (or succeed again with `None`).
    pub fn fail_with(&self, error: Option<Error>) {
        self.write().failure = error;
    }

    /// Delay each load, so concurrent callers overlap.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.write().delay = delay;
    }

    /// Number of loader invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<LoadRequest<T::Key>> {
        self.read().requests.clone()
    }

    pub fn len(&self) -> usize {
        self.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().data.is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryState<T>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryState<T>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, request: &LoadRequest<T::Key>) -> Result<LoadResult<T>> {
        let state = self.read();
        if let Some(error) = &state.failure {
            return Err(error.clone());
        }
        let found = match &request.key {
            ResourceKey::All => state.data.clone(),
            selector => selector
                .keys()
                .into_iter()
                .filter_map(|key| state.data.get(&key).map(|value| (key, value.clone())))
                .collect(),
        };
        Ok(found)
    }
}

impl<T: ResourceEntity> Default for InMemoryLoader<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ResourceEntity> ResourceLoader<T> for InMemoryLoader<T> {
    async fn load(&self, request: LoadRequest<T::Key>) -> Result<LoadResult<T>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = {
            let mut state = self.write();
            state.requests.push(request.clone());
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.snapshot(&request)
    }
}

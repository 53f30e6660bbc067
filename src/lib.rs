//! # resource-kit
//!
//! A keyed, coalescing, invalidation-aware cache for entities fetched from a
//! remote API.
//!
//! ## Features
//!
//! - **Request coalescing:** concurrent loads of overlapping keys share one fetch
//! - **All-keys loads:** load the complete collection and reconcile removed keys
//! - **Lazy invalidation:** `mark_outdated` now, refetch on the next `load`
//! - **Merge writes:** updates overlay onto cached entries field by field
//! - **Dependent resources:** add/delete/outdate notifications with ordered handlers
//! - **Deterministic races:** most recent logical write wins, never wall-clock order
//!
//! ## Quick Start
//!
//! ```ignore
//! use resource_kit::{CachedMapResource, ResourceEntity, ResourceKey, loader_fn};
//! use serde::{Deserialize, Serialize};
//!
//! // 1. Define your entity
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Connection {
//!     id: String,
//!     connected: bool,
//! }
//!
//! // 2. Implement ResourceEntity
//! impl ResourceEntity for Connection {
//!     type Key = String;
//!     fn resource_key(&self) -> Self::Key { self.id.clone() }
//!     fn resource_prefix() -> &'static str { "connection" }
//! }
//!
//! // 3. Supply a loader for the remote API
//! let connections = CachedMapResource::new(loader_fn(move |request| {
//!     let api = api.clone();
//!     async move { api.fetch_connections(request.key).await }
//! }));
//!
//! // 4. Use it - CachedMapResource is Clone for sharing between tasks
//! let all = connections.load_all().await?;
//! let one = connections.get(&"c1".to_string());
//! connections.mark_outdated(ResourceKey::All);
//! ```
//!
//! ## Concrete resources
//!
//! [`resources`] wires the database client resources (permissions,
//! connections, drivers, execution contexts) over a [`resources::DatabaseApi`].

#[macro_use]
extern crate log;

pub mod entity;
pub mod error;
pub mod executor;
pub mod key;
pub mod loader;
pub mod observability;
pub mod resource;
pub mod resources;
pub mod serialization;
pub mod store;
pub mod strategy;

// Re-exports for convenience
pub use entity::ResourceEntity;
pub use error::{Error, Result};
pub use executor::{Executor, HandlerId};
pub use key::{KeyBuilder, ResourceKey};
pub use loader::{loader_fn, InMemoryLoader, Includes, LoadRequest, LoadResult, ResourceLoader};
pub use resource::{CachedMapResource, Requirement, ResourceConfig, ResourceError, WeakResource};
pub use strategy::{EntryInfo, ResourceStrategy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

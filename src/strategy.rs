//! Access strategies and per-entry metadata views.
//!
//! # The Three Strategies
//!
//! ```
//! use resource_kit::strategy::ResourceStrategy;
//!
//! // 1. Cached - read what is in memory, never fetch
//! let _s = ResourceStrategy::Cached;
//!
//! // 2. Load - fetch only when absent or outdated (default)
//! let _s = ResourceStrategy::Load;
//!
//! // 3. Refresh - always fetch, superseding in-flight fetches
//! let _s = ResourceStrategy::Refresh;
//! ```
//!
//! | Strategy | Present & current | Absent / outdated | Use Case |
//! |----------|-------------------|-------------------|----------|
//! | **Cached** | Return | Return what is there | Render path, never blocks |
//! | **Load** | Return | Fetch, then return | Default for views |
//! | **Refresh** | Fetch | Fetch | User pressed "refresh", after mutations |
//!
//! Lazy invalidation (`mark_outdated`) is not a strategy: it changes state
//! without fetching and lets the next `Load` do the work.

use crate::error::Error;
use crate::loader::Includes;
use std::time::Instant;

/// Strategy controlling whether an access may fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResourceStrategy {
    /// Pure read from memory.
    Cached,

    /// Fetch when the entry is absent, outdated, expired or lacks includes.
    #[default]
    Load,

    /// Fetch unconditionally.
    Refresh,
}

impl std::fmt::Display for ResourceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStrategy::Cached => write!(f, "Cached"),
            ResourceStrategy::Load => write!(f, "Load"),
            ResourceStrategy::Refresh => write!(f, "Refresh"),
        }
    }
}

/// Metadata snapshot for one key.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryInfo {
    /// Label `"{prefix}:{key}"`
    pub key: String,

    /// The entry is present, or the key is known absent from a loaded collection
    pub loaded: bool,

    /// The entry is flagged stale
    pub outdated: bool,

    /// A fetch or an update covering this key is in flight
    pub loading: bool,

    /// Last error raised for this key, cleared by the next successful fetch
    pub exception: Option<Error>,

    /// Optional fields loaded with the entry
    pub includes: Includes,

    /// When the entry was last written
    pub updated_at: Option<Instant>,
}

impl EntryInfo {
    pub fn new(key: String) -> Self {
        EntryInfo {
            key,
            loaded: false,
            outdated: false,
            loading: false,
            exception: None,
            includes: Includes::none(),
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_display() {
        assert_eq!(ResourceStrategy::Cached.to_string(), "Cached");
        assert_eq!(ResourceStrategy::Load.to_string(), "Load");
        assert_eq!(ResourceStrategy::Refresh.to_string(), "Refresh");
    }

    #[test]
    fn test_strategy_default() {
        assert_eq!(ResourceStrategy::default(), ResourceStrategy::Load);
    }

    #[test]
    fn test_entry_info_defaults() {
        let info = EntryInfo::new("connection:c1".to_string());
        assert!(!info.loaded);
        assert!(!info.loading);
        assert!(info.exception.is_none());
        assert!(info.includes.is_empty());
    }
}

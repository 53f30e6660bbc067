//! Observability and staleness policies for resources.
//!
//! - **Metrics (`ResourceMetrics`)**: hits, misses, fetches, coalesced waits,
//!   deletes and errors.
//! - **TTL Policies (`TtlPolicy`)**: how long a loaded entry is trusted before
//!   a `load` treats it as outdated.
//!
//! # Metrics
//!
//! ```ignore
//! use resource_kit::observability::ResourceMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl ResourceMetrics for PrometheusMetrics {
//!     fn record_fetch(&self, key: &str, entities: usize, duration: Duration) {
//!         // histogram!("resource_fetch_seconds").record(duration);
//!     }
//! }
//!
//! let config = ResourceConfig::default().with_metrics(Arc::new(PrometheusMetrics));
//! ```
//!
//! The trait's default methods log through the `log` crate; `NoOpMetrics`
//! (the default) records nothing.
//!
//! # TTL Policies
//!
//! ```
//! use resource_kit::observability::TtlPolicy;
//! use std::time::Duration;
//!
//! let _policy = TtlPolicy::Fixed(Duration::from_secs(300));
//!
//! let _policy = TtlPolicy::PerType(|resource| match resource {
//!     "permission" => Duration::from_secs(60),
//!     _ => Duration::from_secs(600),
//! });
//! ```
//!
//! Expired entries are not evicted; they stay readable through `get` and are
//! refetched by the next `load`.

use std::time::Duration;

/// Trait for resource metrics collection.
pub trait ResourceMetrics: Send + Sync {
    /// A load was served from memory.
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Resource HIT: {} took {:?}", key, duration);
    }

    /// A load had to fetch.
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Resource MISS: {} took {:?}", key, duration);
    }

    /// A loader call completed.
    fn record_fetch(&self, key: &str, entities: usize, duration: Duration) {
        debug!(
            "Resource FETCH: {} returned {} entities in {:?}",
            key, entities, duration
        );
    }

    /// A load joined a fetch already in flight.
    fn record_coalesced(&self, key: &str) {
        debug!("Resource COALESCED: {}", key);
    }

    /// Entries were removed.
    fn record_delete(&self, key: &str, count: usize) {
        debug!("Resource DELETE: {} ({} entries)", key, count);
    }

    /// A fetch or update failed.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Resource ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl ResourceMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_fetch(&self, _key: &str, _entities: usize, _duration: Duration) {}
    fn record_coalesced(&self, _key: &str) {}
    fn record_delete(&self, _key: &str, _count: usize) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Metrics implementation that only logs (uses the trait defaults).
#[derive(Clone, Default)]
pub struct LogMetrics;

impl ResourceMetrics for LogMetrics {}

/// How long loaded entries stay current.
#[derive(Clone, Debug, Default)]
pub enum TtlPolicy {
    /// Entries stay current until explicitly outdated
    #[default]
    Default,

    /// Fixed duration for all entries
    Fixed(Duration),

    /// Never expire
    Infinite,

    /// Custom per-resource policy
    PerType(fn(&str) -> Duration),
}

impl TtlPolicy {
    /// Get TTL for a resource prefix.
    pub fn get_ttl(&self, resource: &str) -> Option<Duration> {
        match self {
            TtlPolicy::Default => None,
            TtlPolicy::Fixed(d) => Some(*d),
            TtlPolicy::Infinite => None,
            TtlPolicy::PerType(f) => Some(f(resource)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_metrics() {
        let metrics = NoOpMetrics;
        metrics.record_hit("key", Duration::from_secs(1));
        metrics.record_fetch("key", 3, Duration::from_secs(2));
        metrics.record_coalesced("key");
    }

    #[test]
    fn test_ttl_policy_default() {
        assert_eq!(TtlPolicy::Default.get_ttl("any"), None);
        assert_eq!(TtlPolicy::Infinite.get_ttl("any"), None);
    }

    #[test]
    fn test_ttl_policy_fixed() {
        let policy = TtlPolicy::Fixed(Duration::from_secs(300));
        assert_eq!(policy.get_ttl("any"), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_ttl_policy_per_type() {
        let policy = TtlPolicy::PerType(|resource| match resource {
            "permission" => Duration::from_secs(60),
            _ => Duration::from_secs(600),
        });

        assert_eq!(policy.get_ttl("permission"), Some(Duration::from_secs(60)));
        assert_eq!(policy.get_ttl("driver"), Some(Duration::from_secs(600)));
    }
}

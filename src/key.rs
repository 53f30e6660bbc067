//! Resource key selectors and key label utilities.
//!
//! A [`ResourceKey`] selects which part of a resource's key-space an operation
//! targets: one key, an explicit list, or the whole collection. The "all"
//! selector is a distinct variant and never compares equal to a real key.

use std::fmt::{self, Display};
use std::hash::Hash;

/// Selector over a resource's key-space.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKey<K> {
    /// A single entity.
    Key(K),
    /// An explicit list of entities.
    List(Vec<K>),
    /// The complete collection.
    All,
}

impl<K: Clone + Eq> ResourceKey<K> {
    /// Build a list selector, dropping duplicate keys while keeping order.
    pub fn list<I: IntoIterator<Item = K>>(keys: I) -> Self {
        let mut list: Vec<K> = Vec::new();
        for key in keys {
            if !list.contains(&key) {
                list.push(key);
            }
        }
        ResourceKey::List(list)
    }

    /// True for the all-keys selector.
    pub fn is_all(&self) -> bool {
        matches!(self, ResourceKey::All)
    }

    /// True when the selector names no keys at all.
    pub fn is_empty(&self) -> bool {
        matches!(self, ResourceKey::List(list) if list.is_empty())
    }

    /// Whether the selector includes `key`.
    pub fn includes(&self, key: &K) -> bool {
        match self {
            ResourceKey::Key(k) => k == key,
            ResourceKey::List(list) => list.contains(key),
            ResourceKey::All => true,
        }
    }

    /// Whether every key selected by `other` is also selected by `self`.
    pub fn covers(&self, other: &ResourceKey<K>) -> bool {
        match (self, other) {
            (ResourceKey::All, _) => true,
            (_, ResourceKey::All) => false,
            (_, ResourceKey::Key(k)) => self.includes(k),
            (_, ResourceKey::List(list)) => list.iter().all(|k| self.includes(k)),
        }
    }

    /// Explicit keys of the selector; empty for `All`.
    pub fn keys(&self) -> Vec<K> {
        match self {
            ResourceKey::Key(k) => vec![k.clone()],
            ResourceKey::List(list) => list.clone(),
            ResourceKey::All => Vec::new(),
        }
    }

    /// Map every explicit key, keeping the selector shape.
    pub fn map<U, F: FnMut(&K) -> U>(&self, mut f: F) -> ResourceKey<U> {
        match self {
            ResourceKey::Key(k) => ResourceKey::Key(f(k)),
            ResourceKey::List(list) => ResourceKey::List(list.iter().map(f).collect()),
            ResourceKey::All => ResourceKey::All,
        }
    }
}

impl<K> From<K> for ResourceKey<K> {
    fn from(key: K) -> Self {
        ResourceKey::Key(key)
    }
}

impl<K: Display> Display for ResourceKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Key(k) => write!(f, "{}", k),
            ResourceKey::List(list) => {
                write!(f, "[")?;
                for (i, k) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", k)?;
                }
                write!(f, "]")
            }
            ResourceKey::All => write!(f, "*"),
        }
    }
}

/// Builder for key labels used in logs and metrics, and for composite ids.
pub struct KeyBuilder;

impl KeyBuilder {
    /// Build a label from a resource prefix and a selector: `"{prefix}:{key}"`.
    pub fn build<K: Display>(prefix: &str, key: &ResourceKey<K>) -> String {
        format!("{}:{}", prefix, key)
    }

    /// Build a composite id from multiple parts.
    pub fn build_composite(parts: &[&str]) -> String {
        parts.join(":")
    }
}

/// Marker bound for types usable as resource keys.
pub trait KeyType: Display + fmt::Debug + Clone + Send + Sync + Eq + Hash + 'static {}

impl<T> KeyType for T where T: Display + fmt::Debug + Clone + Send + Sync + Eq + Hash + 'static {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_covers_everything() {
        let all: ResourceKey<String> = ResourceKey::All;
        assert!(all.covers(&ResourceKey::Key("a".to_string())));
        assert!(all.covers(&ResourceKey::list(vec!["a".to_string()])));
        assert!(all.covers(&ResourceKey::All));
    }

    #[test]
    fn test_key_never_covers_all() {
        let key = ResourceKey::Key("a".to_string());
        assert!(!key.covers(&ResourceKey::All));
        assert!(!ResourceKey::list(vec!["a".to_string()]).covers(&ResourceKey::All));
    }

    #[test]
    fn test_list_covers_subset() {
        let list = ResourceKey::list(vec![1, 2, 3]);
        assert!(list.covers(&ResourceKey::Key(2)));
        assert!(list.covers(&ResourceKey::list(vec![3, 1])));
        assert!(!list.covers(&ResourceKey::list(vec![3, 4])));
    }

    #[test]
    fn test_list_dedupes() {
        let list = ResourceKey::list(vec![1, 2, 1, 3, 2]);
        assert_eq!(list, ResourceKey::List(vec![1, 2, 3]));
        assert!(ResourceKey::<u32>::list(Vec::new()).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(ResourceKey::Key("c1").to_string(), "c1");
        assert_eq!(ResourceKey::List(vec!["a", "b"]).to_string(), "[a, b]");
        assert_eq!(ResourceKey::<&str>::All.to_string(), "*");
    }

    #[test]
    fn test_key_builder_label() {
        let label = KeyBuilder::build("connection", &ResourceKey::Key("c1"));
        assert_eq!(label, "connection:c1");
        assert_eq!(
            KeyBuilder::build::<&str>("connection", &ResourceKey::All),
            "connection:*"
        );
    }

    #[test]
    fn test_composite_id() {
        let id = KeyBuilder::build_composite(&["conn", "ctx_1"]);
        assert_eq!(id, "conn:ctx_1");
    }

    #[test]
    fn test_map_keeps_shape() {
        let key = ResourceKey::list(vec![1, 2]);
        assert_eq!(key.map(|k| k * 10), ResourceKey::List(vec![10, 20]));
        assert_eq!(ResourceKey::<u32>::All.map(|k| k + 1), ResourceKey::All);
    }
}

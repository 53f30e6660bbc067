//! Core entity trait that all cached resource entities must implement.

use crate::error::{Error, Result};
use crate::key::KeyType;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Trait that all entities held by a resource must implement.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use resource_kit::ResourceEntity;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// pub struct Connection {
///     pub id: String,
///     pub name: String,
///     pub connected: bool,
/// }
///
/// impl ResourceEntity for Connection {
///     type Key = String;
///
///     fn resource_key(&self) -> Self::Key {
///         self.id.clone()
///     }
///
///     fn resource_prefix() -> &'static str {
///         "connection"
///     }
/// }
/// ```
pub trait ResourceEntity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Type of the entity's key (typically `String`).
    type Key: KeyType;

    /// Return the entity's unique key.
    fn resource_key(&self) -> Self::Key;

    /// Resource name used in logs and metric labels, e.g. `"connection"`.
    fn resource_prefix() -> &'static str;

    /// Merge an incoming snapshot of this entity onto the cached one.
    ///
    /// Default: shallow field overlay where every non-null field of `incoming`
    /// replaces the cached field and `null` fields keep the cached value.
    /// Override when an entity needs different merge rules.
    fn merge_from(&self, incoming: &Self) -> Result<Self> {
        let mut base = serde_json::to_value(self)?;
        let patch = serde_json::to_value(incoming)?;
        merge_json(&mut base, patch, false);
        Ok(serde_json::from_value(base)?)
    }

    /// Apply a partial update. Fields absent from `patch` are preserved.
    ///
    /// Explicit `null` values in the patch do clear the field.
    fn apply_patch(&self, patch: Value) -> Result<Self> {
        if !patch.is_object() {
            return Err(Error::MergeError(format!(
                "patch for {} must be a JSON object",
                Self::resource_prefix()
            )));
        }
        let mut base = serde_json::to_value(self)?;
        merge_json(&mut base, patch, true);
        Ok(serde_json::from_value(base)?)
    }

    /// Optional: validate an entity after it was loaded.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Shallow, top-level overlay of `patch` onto `base`.
///
/// When `keep_nulls` is false, `null` fields of the patch are skipped.
/// Non-object values replace `base` entirely.
pub fn merge_json(base: &mut Value, patch: Value, keep_nulls: bool) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (field, value) in patch {
                if value.is_null() && !keep_nulls {
                    continue;
                }
                base.insert(field, value);
            }
        }
        (base, patch) => *base = patch,
    }
}

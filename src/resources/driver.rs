//! Database drivers available on the server.
//!
//! Driver parameters and provider properties are expensive to compute on the
//! server, so they are only fetched when requested through [`Includes`]:
//!
//! ```ignore
//! let drivers = resources.drivers
//!     .load_with_includes(ResourceKey::Key(id), Includes::of([INCLUDE_DRIVER_PARAMETERS]))
//!     .await?;
//! ```

use crate::entity::ResourceEntity;
use crate::error::Result;
use crate::key::ResourceKey;
use crate::loader::{Includes, LoadRequest, LoadResult, ResourceLoader};
use crate::resource::{CachedMapResource, ResourceConfig};
use crate::resources::api::DatabaseApi;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

pub const INCLUDE_DRIVER_PARAMETERS: &str = "driverParameters";
pub const INCLUDE_PROVIDER_PROPERTIES: &str = "providerProperties";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DBDriver {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub driver_class_name: Option<String>,
    #[serde(default)]
    pub default_port: Option<String>,
    #[serde(default)]
    pub promoted_score: Option<i32>,
    #[serde(default)]
    pub embedded: bool,

    /// Only present when loaded with `INCLUDE_DRIVER_PARAMETERS`
    #[serde(default)]
    pub driver_parameters: Option<Value>,

    /// Only present when loaded with `INCLUDE_PROVIDER_PROPERTIES`
    #[serde(default)]
    pub provider_properties: Option<Vec<Value>>,
}

impl DBDriver {
    pub fn new(id: &str, name: &str) -> Self {
        DBDriver {
            id: id.to_string(),
            name: Some(name.to_string()),
            description: None,
            icon: None,
            provider_id: None,
            driver_class_name: None,
            default_port: None,
            promoted_score: None,
            embedded: false,
            driver_parameters: None,
            provider_properties: None,
        }
    }
}

impl ResourceEntity for DBDriver {
    type Key = String;

    fn resource_key(&self) -> Self::Key {
        self.id.clone()
    }

    fn resource_prefix() -> &'static str {
        "driver"
    }
}

pub struct DriverLoader<A> {
    api: Arc<A>,
}

impl<A: DatabaseApi> ResourceLoader<DBDriver> for DriverLoader<A> {
    fn load(
        &self,
        request: LoadRequest<String>,
    ) -> impl Future<Output = Result<LoadResult<DBDriver>>> + Send {
        let api = Arc::clone(&self.api);
        async move {
            let drivers = match &request.key {
                ResourceKey::All => api.driver_list(None, request.includes.clone()).await?,
                selector => {
                    let mut drivers = Vec::new();
                    for id in selector.keys() {
                        drivers.extend(api.driver_list(Some(id), request.includes.clone()).await?);
                    }
                    drivers
                }
            };
            Ok(drivers
                .into_iter()
                .map(|driver| (driver.id.clone(), driver))
                .collect())
        }
    }
}

pub type DriverCache<A> = CachedMapResource<DBDriver, DriverLoader<A>>;

pub struct DBDriverResource<A> {
    resource: DriverCache<A>,
}

impl<A> Clone for DBDriverResource<A> {
    fn clone(&self) -> Self {
        DBDriverResource {
            resource: self.resource.clone(),
        }
    }
}

impl<A> Deref for DBDriverResource<A> {
    type Target = DriverCache<A>;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<A: DatabaseApi> DBDriverResource<A> {
    pub fn new(api: Arc<A>, config: ResourceConfig) -> Self {
        DBDriverResource {
            resource: CachedMapResource::with_config(DriverLoader { api }, config),
        }
    }

    /// Cached drivers ordered with [`compare`].
    pub fn sorted(&self) -> Vec<DBDriver> {
        let mut drivers = self.resource.values();
        drivers.sort_by(compare);
        drivers
    }

    /// Load one driver together with optional fields.
    pub async fn load_with(&self, id: &str, includes: Includes) -> Result<Option<DBDriver>> {
        let mut drivers = self
            .resource
            .load_with_includes(ResourceKey::Key(id.to_string()), includes)
            .await?;
        Ok(drivers.pop())
    }
}

/// Higher promoted score first, then by name.
pub fn compare(a: &DBDriver, b: &DBDriver) -> Ordering {
    if a.promoted_score == b.promoted_score {
        let a_name = a.name.as_deref().unwrap_or_default();
        let b_name = b.name.as_deref().unwrap_or_default();
        return a_name.cmp(b_name);
    }
    b.promoted_score
        .unwrap_or(0)
        .cmp(&a.promoted_score.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(id: &str, name: &str, score: Option<i32>) -> DBDriver {
        let mut driver = DBDriver::new(id, name);
        driver.promoted_score = score;
        driver
    }

    #[test]
    fn test_compare_prefers_promoted() {
        let promoted = driver("pg", "PostgreSQL", Some(10));
        let plain = driver("h2", "H2", None);
        assert_eq!(compare(&promoted, &plain), Ordering::Less);
        assert_eq!(compare(&plain, &promoted), Ordering::Greater);
    }

    #[test]
    fn test_compare_by_name_on_tie() {
        let a = driver("a", "Alpha", Some(1));
        let b = driver("b", "Beta", Some(1));
        assert_eq!(compare(&a, &b), Ordering::Less);

        let mut drivers = vec![b.clone(), driver("c", "Zed", Some(5)), a.clone()];
        drivers.sort_by(compare);
        let names: Vec<_> = drivers.iter().filter_map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["Zed", "Alpha", "Beta"]);
    }

    #[test]
    fn test_merge_keeps_included_fields() {
        let mut full = DBDriver::new("pg", "PostgreSQL");
        full.driver_parameters = Some(serde_json::json!({ "ssl": true }));
        let light = DBDriver::new("pg", "PostgreSQL 16");

        let merged = full.merge_from(&light).expect("merge failed");
        assert_eq!(merged.name.as_deref(), Some("PostgreSQL 16"));
        assert!(merged.driver_parameters.is_some());
    }
}

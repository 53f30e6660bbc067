//! Permissions granted to the current session.
//!
//! Other resources gate their fetches on a permission with
//! [`PermissionsResource::require`], and are outdated together with the
//! permission set through [`PermissionsResource::outdate_resource`].

use crate::entity::ResourceEntity;
use crate::error::{Error, Result};
use crate::loader::{LoadRequest, LoadResult, ResourceLoader};
use crate::resource::{CachedMapResource, Requirement, ResourceConfig};
use crate::resources::api::DatabaseApi;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

/// Granted to every session, including anonymous ones.
pub const PERMISSION_PUBLIC: &str = "public";

/// Granted to administrators.
pub const PERMISSION_ADMIN: &str = "admin";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
}

impl ResourceEntity for Permission {
    type Key = String;

    fn resource_key(&self) -> Self::Key {
        self.id.clone()
    }

    fn resource_prefix() -> &'static str {
        "permission"
    }
}

pub struct PermissionsLoader<A> {
    api: Arc<A>,
}

impl<A: DatabaseApi> ResourceLoader<Permission> for PermissionsLoader<A> {
    fn load(
        &self,
        request: LoadRequest<String>,
    ) -> impl Future<Output = Result<LoadResult<Permission>>> + Send {
        let api = Arc::clone(&self.api);
        async move {
            // The API only lists the whole set; narrow it to the selector.
            let granted = api.permissions().await?;
            Ok(granted
                .into_iter()
                .filter(|id| request.key.includes(id))
                .map(|id| (id.clone(), Permission { id }))
                .collect())
        }
    }
}

pub type PermissionsCache<A> = CachedMapResource<Permission, PermissionsLoader<A>>;

pub struct PermissionsResource<A> {
    resource: PermissionsCache<A>,
}

impl<A> Clone for PermissionsResource<A> {
    fn clone(&self) -> Self {
        PermissionsResource {
            resource: self.resource.clone(),
        }
    }
}

impl<A> Deref for PermissionsResource<A> {
    type Target = PermissionsCache<A>;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<A: DatabaseApi> PermissionsResource<A> {
    pub fn new(api: Arc<A>, config: ResourceConfig) -> Self {
        PermissionsResource {
            resource: CachedMapResource::with_config(PermissionsLoader { api }, config),
        }
    }

    /// Whether the session holds `permission`, loading the set if needed.
    pub async fn has_permission(&self, permission: &str) -> Result<bool> {
        self.resource.load_all().await?;
        Ok(self.resource.has(&permission.to_string()))
    }

    /// Make every fetch of `resource` fail with `PermissionDenied` unless the
    /// session holds `permission`.
    pub fn require<U, M>(&self, resource: &CachedMapResource<U, M>, permission: &str) -> &Self
    where
        U: ResourceEntity,
        M: ResourceLoader<U>,
    {
        resource.require(Arc::new(PermissionRequirement {
            permissions: self.clone(),
            permission: permission.to_string(),
        }));
        self
    }

    /// Outdate `dependent` whenever the permission set is outdated.
    pub fn outdate_resource<U, M>(&self, dependent: &CachedMapResource<U, M>) -> &Self
    where
        U: ResourceEntity,
        M: ResourceLoader<U>,
    {
        self.resource.outdate_resource(dependent);
        self
    }
}

struct PermissionRequirement<A> {
    permissions: PermissionsResource<A>,
    permission: String,
}

impl<A: DatabaseApi> Requirement for PermissionRequirement<A> {
    fn describe(&self) -> String {
        format!("permission:{}", self.permission)
    }

    fn ensure(&self) -> BoxFuture<'static, Result<()>> {
        let permissions = self.permissions.clone();
        let permission = self.permission.clone();
        async move {
            if permissions.has_permission(&permission).await? {
                Ok(())
            } else {
                Err(Error::PermissionDenied(format!(
                    "missing permission '{}'",
                    permission
                )))
            }
        }
        .boxed()
    }
}

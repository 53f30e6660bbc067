//! Concrete resources of the database client and their composition root.
//!
//! ```ignore
//! let resources = AppResources::new(Arc::new(GraphQlApi::connect(url)?));
//!
//! let drivers = resources.drivers.load_all().await?;
//! let context = resources.contexts.create("conn-1", None, None).await?;
//!
//! // Deleting the connection drops its contexts before `remove` returns.
//! resources.connections.remove("conn-1").await?;
//! ```

pub mod api;
pub mod connection;
pub mod driver;
pub mod execution_context;
pub mod permissions;

pub use api::{DatabaseApi, SqlContextInfo};
pub use connection::{ConnectionInfo, ConnectionInfoResource};
pub use driver::{DBDriver, DBDriverResource};
pub use execution_context::{ConnectionExecutionContextInfo, ConnectionExecutionContextResource};
pub use permissions::{Permission, PermissionsResource, PERMISSION_ADMIN, PERMISSION_PUBLIC};

use crate::key::ResourceKey;
use crate::resource::ResourceConfig;
use std::sync::Arc;

/// All resources of one server session, constructed and wired together.
pub struct AppResources<A> {
    pub permissions: PermissionsResource<A>,
    pub connections: ConnectionInfoResource<A>,
    pub drivers: DBDriverResource<A>,
    pub contexts: ConnectionExecutionContextResource<A>,
}

impl<A> Clone for AppResources<A> {
    fn clone(&self) -> Self {
        AppResources {
            permissions: self.permissions.clone(),
            connections: self.connections.clone(),
            drivers: self.drivers.clone(),
            contexts: self.contexts.clone(),
        }
    }
}

impl<A: DatabaseApi> AppResources<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self::with_config(api, ResourceConfig::default())
    }

    /// Build every resource with the same configuration.
    pub fn with_config(api: Arc<A>, config: ResourceConfig) -> Self {
        let permissions = PermissionsResource::new(Arc::clone(&api), config.clone());
        let connections = ConnectionInfoResource::new(Arc::clone(&api), config.clone());
        let drivers = DBDriverResource::new(Arc::clone(&api), config.clone());
        let contexts =
            ConnectionExecutionContextResource::new(Arc::clone(&api), &connections, config);

        permissions
            .require(&connections, PERMISSION_PUBLIC)
            .outdate_resource(&connections);
        permissions.require(&drivers, PERMISSION_PUBLIC);
        permissions
            .require(&contexts, PERMISSION_PUBLIC)
            .outdate_resource(&contexts);

        debug!("Resources wired: permission, connection, driver, execution-context");

        AppResources {
            permissions,
            connections,
            drivers,
            contexts,
        }
    }

    /// Mark every resource outdated, e.g. after the session user changed.
    ///
    /// Connections and contexts follow the permission set through
    /// `outdate_resource`.
    pub fn outdate_all(&self) {
        self.permissions.mark_outdated(ResourceKey::All);
        self.drivers.mark_outdated(ResourceKey::All);
    }
}

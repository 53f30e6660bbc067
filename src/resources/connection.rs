//! Database connections known to the server.

use crate::entity::ResourceEntity;
use crate::error::Result;
use crate::key::ResourceKey;
use crate::loader::{LoadRequest, LoadResult, ResourceLoader};
use crate::resource::{CachedMapResource, ResourceConfig};
use crate::resources::api::DatabaseApi;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: String,
    pub name: String,
    pub driver_id: String,
    pub connected: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
}

impl ResourceEntity for ConnectionInfo {
    type Key = String;

    fn resource_key(&self) -> Self::Key {
        self.id.clone()
    }

    fn resource_prefix() -> &'static str {
        "connection"
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(crate::error::Error::ValidationError(
                "connection id is empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct ConnectionLoader<A> {
    api: Arc<A>,
}

impl<A: DatabaseApi> ResourceLoader<ConnectionInfo> for ConnectionLoader<A> {
    fn load(
        &self,
        request: LoadRequest<String>,
    ) -> impl Future<Output = Result<LoadResult<ConnectionInfo>>> + Send {
        let api = Arc::clone(&self.api);
        async move {
            let connections = match &request.key {
                ResourceKey::All => api.connection_list(None).await?,
                selector => {
                    let mut connections = Vec::new();
                    for id in selector.keys() {
                        connections.extend(api.connection_list(Some(id)).await?);
                    }
                    connections
                }
            };
            Ok(connections
                .into_iter()
                .map(|connection| (connection.id.clone(), connection))
                .collect())
        }
    }
}

pub type ConnectionCache<A> = CachedMapResource<ConnectionInfo, ConnectionLoader<A>>;

pub struct ConnectionInfoResource<A> {
    resource: ConnectionCache<A>,
    api: Arc<A>,
}

impl<A> Clone for ConnectionInfoResource<A> {
    fn clone(&self) -> Self {
        ConnectionInfoResource {
            resource: self.resource.clone(),
            api: Arc::clone(&self.api),
        }
    }
}

impl<A> Deref for ConnectionInfoResource<A> {
    type Target = ConnectionCache<A>;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<A: DatabaseApi> ConnectionInfoResource<A> {
    pub fn new(api: Arc<A>, config: ResourceConfig) -> Self {
        let loader = ConnectionLoader {
            api: Arc::clone(&api),
        };
        ConnectionInfoResource {
            resource: CachedMapResource::with_config(loader, config),
            api,
        }
    }

    /// Close a connection on the server and merge its new state.
    ///
    /// Fires `on_item_add` with the connection id, which lets dependents drop
    /// state bound to the now closed connection.
    pub async fn close(&self, id: &str) -> Result<Option<ConnectionInfo>> {
        let key = ResourceKey::Key(id.to_string());
        let closed = self
            .resource
            .perform_update(key, || self.api.connection_close(id.to_string()))
            .await?;

        debug!("Connection {} closed", id);
        self.resource.set(closed)?;
        Ok(self.resource.get(&id.to_string()))
    }

    /// Delete a connection on the server, then drop it from the cache.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let key = ResourceKey::Key(id.to_string());
        self.resource
            .perform_update(key.clone(), || self.api.connection_delete(id.to_string()))
            .await?;

        self.resource.delete(key);
        Ok(())
    }
}

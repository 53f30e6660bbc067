//! SQL execution contexts opened on connections.
//!
//! Contexts are keyed by a base id combining connection and context ids, since
//! context ids are only unique within one connection. The resource follows its
//! connections: contexts of a deleted connection are dropped, and so are the
//! contexts of a connection that was re-added in a disconnected state.

use crate::entity::ResourceEntity;
use crate::error::{Error, Result};
use crate::key::{KeyBuilder, ResourceKey};
use crate::loader::{LoadRequest, LoadResult, ResourceLoader};
use crate::resource::{CachedMapResource, ResourceConfig, WeakResource};
use crate::resources::api::{DatabaseApi, SqlContextInfo};
use crate::resources::connection::{ConnectionInfo, ConnectionInfoResource, ConnectionLoader};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionExecutionContextInfo {
    pub base_id: String,
    pub id: String,
    pub connection_id: String,
    pub default_catalog: Option<String>,
    pub default_schema: Option<String>,
}

impl From<SqlContextInfo> for ConnectionExecutionContextInfo {
    fn from(context: SqlContextInfo) -> Self {
        ConnectionExecutionContextInfo {
            base_id: context_base_id(&context.connection_id, &context.id),
            id: context.id,
            connection_id: context.connection_id,
            default_catalog: context.default_catalog,
            default_schema: context.default_schema,
        }
    }
}

impl ResourceEntity for ConnectionExecutionContextInfo {
    type Key = String;

    fn resource_key(&self) -> Self::Key {
        self.base_id.clone()
    }

    fn resource_prefix() -> &'static str {
        "execution-context"
    }
}

/// `"{connection_id}:{context_id}"`
pub fn context_base_id(connection_id: &str, context_id: &str) -> String {
    KeyBuilder::build_composite(&[connection_id, context_id])
}

/// Context id part of a base id. Connection ids may themselves contain `:`.
fn context_id_of(base_id: &str) -> &str {
    base_id
        .rsplit_once(':')
        .map_or(base_id, |(_, context_id)| context_id)
}

pub struct ExecutionContextLoader<A> {
    api: Arc<A>,
}

impl<A: DatabaseApi> ResourceLoader<ConnectionExecutionContextInfo> for ExecutionContextLoader<A> {
    fn load(
        &self,
        request: LoadRequest<String>,
    ) -> impl Future<Output = Result<LoadResult<ConnectionExecutionContextInfo>>> + Send {
        let api = Arc::clone(&self.api);
        async move {
            let contexts = match &request.key {
                ResourceKey::All => api.execution_context_list(None).await?,
                selector => {
                    let mut contexts = Vec::new();
                    for base_id in selector.keys() {
                        let context_id = context_id_of(&base_id).to_string();
                        contexts.extend(
                            api.execution_context_list(Some(context_id))
                                .await?
                                .into_iter()
                                .filter(|context| {
                                    context_base_id(&context.connection_id, &context.id) == base_id
                                }),
                        );
                    }
                    contexts
                }
            };
            Ok(contexts
                .into_iter()
                .map(ConnectionExecutionContextInfo::from)
                .map(|context| (context.base_id.clone(), context))
                .collect())
        }
    }
}

pub type ExecutionContextCache<A> =
    CachedMapResource<ConnectionExecutionContextInfo, ExecutionContextLoader<A>>;

pub struct ConnectionExecutionContextResource<A> {
    resource: ExecutionContextCache<A>,
    api: Arc<A>,
}

impl<A> Clone for ConnectionExecutionContextResource<A> {
    fn clone(&self) -> Self {
        ConnectionExecutionContextResource {
            resource: self.resource.clone(),
            api: Arc::clone(&self.api),
        }
    }
}

impl<A> Deref for ConnectionExecutionContextResource<A> {
    type Target = ExecutionContextCache<A>;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<A: DatabaseApi> ConnectionExecutionContextResource<A> {
    /// Create the resource and subscribe it to `connections`.
    pub fn new(api: Arc<A>, connections: &ConnectionInfoResource<A>, config: ResourceConfig) -> Self {
        let loader = ExecutionContextLoader {
            api: Arc::clone(&api),
        };
        let resource = CachedMapResource::with_config(loader, config);

        let contexts = resource.downgrade();
        let weak_connections = connections.downgrade();
        connections.on_item_add().add_handler(move |key| {
            if let Some(contexts) = contexts.upgrade() {
                drop_disconnected(&contexts, &weak_connections, key);
            }
        });

        let contexts = resource.downgrade();
        connections.on_item_delete().add_handler(move |key| {
            if let Some(contexts) = contexts.upgrade() {
                drop_for_connections(&contexts, key);
            }
        });

        ConnectionExecutionContextResource { resource, api }
    }

    /// Open a new execution context on a connection.
    pub async fn create(
        &self,
        connection_id: &str,
        default_catalog: Option<String>,
        default_schema: Option<String>,
    ) -> Result<ConnectionExecutionContextInfo> {
        self.resource
            .perform_update(ResourceKey::List(Vec::new()), move || async move {
                let context: ConnectionExecutionContextInfo = self
                    .api
                    .execution_context_create(connection_id.to_string(), default_catalog, default_schema)
                    .await?
                    .into();

                debug!("Execution context {} created", context.base_id);
                self.resource.set(context.clone())?;
                Ok::<_, Error>(self.resource.get(&context.base_id).unwrap_or(context))
            })
            .await
    }

    /// Change default catalog and schema of an existing context.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the context is not cached.
    pub async fn update(
        &self,
        base_id: &str,
        default_catalog: Option<String>,
        default_schema: Option<String>,
    ) -> Result<ConnectionExecutionContextInfo> {
        let key = base_id.to_string();
        let context = self
            .resource
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("execution context {}", base_id)))?;

        self.resource
            .perform_update(ResourceKey::Key(key.clone()), || {
                self.api.execution_context_update(
                    context.id.clone(),
                    context.connection_id.clone(),
                    default_catalog.clone(),
                    default_schema.clone(),
                )
            })
            .await?;

        self.resource.patch(
            &key,
            json!({ "defaultCatalog": default_catalog, "defaultSchema": default_schema }),
        )?;
        self.resource
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("execution context {}", base_id)))
    }

    /// Close a context on the server and drop it. Unknown contexts are skipped.
    pub async fn destroy(&self, base_id: &str) -> Result<()> {
        let key = base_id.to_string();
        let Some(context) = self.resource.get(&key) else {
            debug!("Execution context {} already gone", base_id);
            return Ok(());
        };

        self.resource
            .perform_update(ResourceKey::Key(key.clone()), || {
                self.api
                    .execution_context_destroy(context.id.clone(), context.connection_id.clone())
            })
            .await?;

        self.resource.delete(ResourceKey::Key(key));
        Ok(())
    }

    /// Cached contexts opened on `connection_id`.
    pub fn for_connection(&self, connection_id: &str) -> Vec<ConnectionExecutionContextInfo> {
        self.resource
            .values()
            .into_iter()
            .filter(|context| context.connection_id == connection_id)
            .collect()
    }
}

fn drop_disconnected<A: DatabaseApi>(
    contexts: &ExecutionContextCache<A>,
    connections: &WeakResource<ConnectionInfo, ConnectionLoader<A>>,
    key: &ResourceKey<String>,
) {
    let Some(connections) = connections.upgrade() else {
        return;
    };
    let stale: Vec<String> = contexts
        .values()
        .into_iter()
        .filter(|context| key.includes(&context.connection_id))
        .filter(|context| {
            !connections
                .get(&context.connection_id)
                .is_some_and(|connection| connection.connected)
        })
        .map(|context| context.base_id)
        .collect();

    if !stale.is_empty() {
        debug!(
            "Dropping {} execution contexts of disconnected connections",
            stale.len()
        );
        contexts.delete(ResourceKey::List(stale));
    }
}

fn drop_for_connections<A: DatabaseApi>(
    contexts: &ExecutionContextCache<A>,
    key: &ResourceKey<String>,
) {
    let orphaned: Vec<String> = contexts
        .values()
        .into_iter()
        .filter(|context| key.includes(&context.connection_id))
        .map(|context| context.base_id)
        .collect();

    if !orphaned.is_empty() {
        debug!(
            "Dropping {} execution contexts of deleted connections",
            orphaned.len()
        );
        contexts.delete(ResourceKey::List(orphaned));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_id_round_trip() {
        let base_id = context_base_id("conn-1", "ctx-9");
        assert_eq!(base_id, "conn-1:ctx-9");
        assert_eq!(context_id_of(&base_id), "ctx-9");
    }

    #[test]
    fn test_context_id_of_connection_id_with_colon() {
        let base_id = context_base_id("pg:prod", "ctx-9");
        assert_eq!(base_id, "pg:prod:ctx-9");
        assert_eq!(context_id_of(&base_id), "ctx-9");
    }

    #[test]
    fn test_from_sql_context() {
        let context = ConnectionExecutionContextInfo::from(SqlContextInfo {
            id: "7".to_string(),
            connection_id: "c".to_string(),
            default_catalog: Some("main".to_string()),
            default_schema: None,
        });
        assert_eq!(context.base_id, "c:7");
        assert_eq!(context.resource_key(), "c:7");
        assert_eq!(context.default_catalog.as_deref(), Some("main"));
    }
}

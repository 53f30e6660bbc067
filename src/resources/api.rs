//! Remote database API consumed by the concrete resources.
//!
//! The resources only depend on this trait; the transport (GraphQL, REST, a
//! test fake) lives behind it.

use crate::error::Result;
use crate::loader::Includes;
use crate::resources::connection::ConnectionInfo;
use crate::resources::driver::DBDriver;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Execution context as returned by the remote API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlContextInfo {
    pub id: String,
    pub connection_id: String,
    pub default_catalog: Option<String>,
    pub default_schema: Option<String>,
}

/// Asynchronous remote API of the database server.
///
/// `None` ids mean "every entity". Absent entities are returned as empty
/// lists, not errors.
pub trait DatabaseApi: Send + Sync + 'static {
    /// Permission ids granted to the current session.
    fn permissions(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn connection_list(
        &self,
        id: Option<String>,
    ) -> impl Future<Output = Result<Vec<ConnectionInfo>>> + Send;

    /// Close a connection; returns its new state.
    fn connection_close(&self, id: String) -> impl Future<Output = Result<ConnectionInfo>> + Send;

    fn connection_delete(&self, id: String) -> impl Future<Output = Result<()>> + Send;

    /// List drivers; `includes` selects optional heavy fields.
    fn driver_list(
        &self,
        id: Option<String>,
        includes: Includes,
    ) -> impl Future<Output = Result<Vec<DBDriver>>> + Send;

    fn execution_context_list(
        &self,
        context_id: Option<String>,
    ) -> impl Future<Output = Result<Vec<SqlContextInfo>>> + Send;

    fn execution_context_create(
        &self,
        connection_id: String,
        default_catalog: Option<String>,
        default_schema: Option<String>,
    ) -> impl Future<Output = Result<SqlContextInfo>> + Send;

    fn execution_context_update(
        &self,
        context_id: String,
        connection_id: String,
        default_catalog: Option<String>,
        default_schema: Option<String>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn execution_context_destroy(
        &self,
        context_id: String,
        connection_id: String,
    ) -> impl Future<Output = Result<()>> + Send;
}

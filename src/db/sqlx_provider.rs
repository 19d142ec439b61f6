//! Providers for the sqlx backends: PostgreSQL, MySQL and SQLite.
//!
//! These backends have no network-wide discovery protocol, so the server list
//! holds the bound server, identified by probing it.

use crate::config::ProviderSettings;
use crate::db::connection::ProviderConnection;
use crate::db::provider::{DatabaseProvider, ProviderCore};
use crate::error::DbResult;
use crate::models::{
    BackendKind, DatabaseInfo, ExecuteRequest, ExecutionMode, ExecutionResult,
    ProviderConnectionConfig, SchemaModel, ServerInfo,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SqlxProvider {
    core: ProviderCore,
}

impl SqlxProvider {
    /// Wrap a prepared core. The core's kind must not be SQL Server.
    pub fn from_core(core: ProviderCore) -> Self {
        debug_assert!(core.kind() != BackendKind::SqlServer);
        Self { core }
    }

    pub fn postgres(settings: Arc<ProviderSettings>) -> Self {
        Self::from_core(ProviderCore::new(BackendKind::PostgreSql, settings))
    }

    pub fn mysql(settings: Arc<ProviderSettings>) -> Self {
        Self::from_core(ProviderCore::new(BackendKind::MySql, settings))
    }

    pub fn sqlite(settings: Arc<ProviderSettings>) -> Self {
        Self::from_core(ProviderCore::new(BackendKind::Sqlite, settings))
    }

    pub fn with_connection(mut self, config: ProviderConnectionConfig) -> Self {
        self.core = self.core.with_connection(config);
        self
    }

    pub fn core(&self) -> &ProviderCore {
        &self.core
    }

    async fn discover_servers(&self, cancel: &CancellationToken) -> DbResult<Vec<ServerInfo>> {
        Ok(self.core.probe_bound_server(cancel).await?.into_iter().collect())
    }
}

#[async_trait]
impl DatabaseProvider for SqlxProvider {
    fn kind(&self) -> BackendKind {
        self.core.kind()
    }

    fn bound_connection(&self) -> Option<&ProviderConnectionConfig> {
        self.core.connection()
    }

    async fn check_connection(
        &self,
        config: &ProviderConnectionConfig,
        cancel: &CancellationToken,
    ) -> DbResult<bool> {
        self.core.check_connection(config, cancel).await
    }

    async fn create_connection(
        &self,
        config: &ProviderConnectionConfig,
        cancel: &CancellationToken,
    ) -> DbResult<ProviderConnection> {
        self.core
            .connect(config, ExecutionMode::ReadOnly, cancel)
            .await
    }

    async fn get_servers(
        &self,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<ServerInfo>> {
        self.core
            .servers_cached_or(force_refresh, cancel, self.discover_servers(cancel))
            .await
    }

    async fn get_databases(
        &self,
        config: &ProviderConnectionConfig,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<DatabaseInfo>> {
        self.core.databases(config, cancel).await
    }

    async fn get_databases_on_server(
        &self,
        server_name: &str,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<DatabaseInfo>> {
        self.core.databases_on_server(server_name, cancel).await
    }

    async fn get_schema(
        &self,
        config: &ProviderConnectionConfig,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> DbResult<SchemaModel> {
        self.core.schema(config, force_refresh, cancel).await
    }

    async fn execute(
        &self,
        config: &ProviderConnectionConfig,
        request: &ExecuteRequest,
        cancel: &CancellationToken,
    ) -> DbResult<ExecutionResult> {
        self.core.execute(config, request, cancel).await
    }
}

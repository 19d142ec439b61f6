//! SQL Server provider (TDS through tiberius).
//!
//! Server discovery combines SQL Server Browser answers with a probe of the
//! bound server, so a default instance behind a firewall that drops UDP 1434
//! is still listed.

use crate::config::ProviderSettings;
use crate::db::browser;
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
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SqlServerProvider {
    core: ProviderCore,
}

impl SqlServerProvider {
    pub fn new(settings: Arc<ProviderSettings>) -> Self {
        Self::from_core(ProviderCore::new(BackendKind::SqlServer, settings))
    }

    pub fn from_core(core: ProviderCore) -> Self {
        debug_assert_eq!(core.kind(), BackendKind::SqlServer);
        Self { core }
    }

    pub fn with_connection(mut self, config: ProviderConnectionConfig) -> Self {
        self.core = self.core.with_connection(config);
        self
    }

    pub fn core(&self) -> &ProviderCore {
        &self.core
    }

    async fn discover_servers(&self, cancel: &CancellationToken) -> DbResult<Vec<ServerInfo>> {
        let settings = self.core.settings();
        let mut servers: Vec<ServerInfo> = match browser::discover_instances(
            &settings.browser_address,
            settings.browser_timeout(),
            cancel,
        )
        .await
        {
            Ok(entries) => entries.iter().map(|e| e.to_server_info()).collect(),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "SQL Server Browser discovery failed");
                Vec::new()
            }
        };

        match self.core.probe_bound_server(cancel).await {
            Ok(Some(bound)) => {
                if !servers.iter().any(|s| s.same_server(&bound)) {
                    servers.insert(0, bound);
                }
            }
            Ok(None) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) if servers.is_empty() => return Err(e),
            Err(e) => warn!(error = %e, "Bound server probe failed"),
        }

        Ok(servers)
    }
}

#[async_trait]
impl DatabaseProvider for SqlServerProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::SqlServer
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Arc<ProviderSettings> {
        Arc::new(ProviderSettings {
            cache_root: Some(dir.path().to_path_buf()),
            browser_address: "127.0.0.1:9".to_string(),
            browser_timeout_ms: 50,
            ..ProviderSettings::default()
        })
    }

    #[tokio::test]
    async fn test_read_only_gate_runs_before_connecting() {
        let dir = TempDir::new().unwrap();
        let provider = SqlServerProvider::new(settings(&dir));
        // Unroutable target: the call must fail at the gate, not at connect
        let config = ProviderConnectionConfig::new("Server=192.0.2.1,1433;Database=x");
        let request = ExecuteRequest::new("DELETE FROM dbo.orders WHERE 1 = 1")
            .with_mode(ExecutionMode::ReadOnly)
            .with_user_query("remove all orders");

        let err = provider
            .execute(&config, &request, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            DbError::Execution { message, result } => {
                assert!(message.contains("not allowed in read-only mode"));
                assert_eq!(result.error_message.as_deref(), Some(message.as_str()));
                assert!(!result.success());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unbound_discovery_without_browser_answers_is_empty() {
        let dir = TempDir::new().unwrap();
        let servers = SqlServerProvider::new(settings(&dir))
            .get_servers(true, &CancellationToken::new())
            .await
            .unwrap();
        assert!(servers.is_empty());
    }
}

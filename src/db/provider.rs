//! The provider contract and the behaviour shared by every backend.
//!
//! A provider never holds a connection between calls: each operation opens a
//! driver connection, uses it and closes it before returning. Dropping a
//! provider therefore releases nothing but its configuration.

use crate::cache::{file_cache, paths};
use crate::config::ProviderSettings;
use crate::db::connection::{self, ProviderConnection};
use crate::db::executor::QueryExecutor;
use crate::db::guard::ExecutionPolicy;
use crate::db::schema::SchemaInspector;
use crate::error::{DbError, DbResult};
use crate::models::{
    BackendKind, DatabaseInfo, ExecuteRequest, ExecutionMode, ExecutionResult,
    ProviderConnectionConfig, SchemaModel, ServerInfo, merge_discovered_servers,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Schema cache contents: connection cache key to schema snapshot.
pub type SchemaCache = BTreeMap<String, SchemaModel>;

/// Operations every database backend exposes.
///
/// Every method honours `cancel`: a cancelled call returns
/// [`DbError::Cancelled`], never a wrapped execution error.
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Stable tag naming the SQL flavour; also the cache file stem.
    fn dialect(&self) -> &'static str {
        self.kind().dialect()
    }

    /// Connection the provider was bound to at construction, if any.
    fn bound_connection(&self) -> Option<&ProviderConnectionConfig>;

    /// `Ok(false)` when the target cannot be reached.
    async fn check_connection(
        &self,
        config: &ProviderConnectionConfig,
        cancel: &CancellationToken,
    ) -> DbResult<bool>;

    /// Open a read-only connection owned by the caller.
    async fn create_connection(
        &self,
        config: &ProviderConnectionConfig,
        cancel: &CancellationToken,
    ) -> DbResult<ProviderConnection>;

    /// Known servers, from the cache unless `force_refresh` is set or the cache is empty.
    async fn get_servers(
        &self,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<ServerInfo>>;

    async fn get_databases(
        &self,
        config: &ProviderConnectionConfig,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<DatabaseInfo>>;

    /// Databases on `server_name`, reached with the bound connection's credentials.
    async fn get_databases_on_server(
        &self,
        server_name: &str,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<DatabaseInfo>>;

    /// Schema snapshot, from the cache unless `force_refresh` is set or no usable entry exists.
    async fn get_schema(
        &self,
        config: &ProviderConnectionConfig,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> DbResult<SchemaModel>;

    /// Run `request.sql` under `request.mode`. Never consults the cache.
    async fn execute(
        &self,
        config: &ProviderConnectionConfig,
        request: &ExecuteRequest,
        cancel: &CancellationToken,
    ) -> DbResult<ExecutionResult>;
}

/// Race `fut` against `cancel`.
pub async fn cancellable<T>(
    operation: &str,
    cancel: &CancellationToken,
    fut: impl Future<Output = DbResult<T>>,
) -> DbResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DbError::cancelled(operation)),
        result = fut => result,
    }
}

/// State and behaviour common to all backend providers.
#[derive(Debug, Clone)]
pub struct ProviderCore {
    kind: BackendKind,
    settings: Arc<ProviderSettings>,
    policy: ExecutionPolicy,
    executor: QueryExecutor,
    server_cache: PathBuf,
    schema_cache: PathBuf,
    connection: Option<ProviderConnectionConfig>,
}

impl ProviderCore {
    /// Core with backend-wide cache files and no bound connection.
    pub fn new(kind: BackendKind, settings: Arc<ProviderSettings>) -> Self {
        let dir = settings.cache_directory(kind);
        Self {
            kind,
            policy: settings.policy(),
            executor: QueryExecutor::new(settings.query_timeout(), settings.row_limit),
            server_cache: paths::server_cache_file(&dir, kind.dialect()),
            schema_cache: paths::schema_cache_file(&dir, kind.dialect()),
            connection: None,
            settings,
        }
    }

    /// Bind a connection used by server probing and `get_databases_on_server`.
    pub fn with_connection(mut self, config: ProviderConnectionConfig) -> Self {
        self.connection = Some(config);
        self
    }

    /// Store the server list in `path` instead of the backend-wide server cache.
    pub fn with_server_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_cache = path.into();
        self
    }

    /// Store schemas in `path` instead of the backend-wide schema cache.
    pub fn with_schema_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_cache = path.into();
        self
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn connection(&self) -> Option<&ProviderConnectionConfig> {
        self.connection.as_ref()
    }

    pub fn server_cache_file(&self) -> &Path {
        &self.server_cache
    }

    pub fn schema_cache_file(&self) -> &Path {
        &self.schema_cache
    }

    pub async fn connect(
        &self,
        config: &ProviderConnectionConfig,
        mode: ExecutionMode,
        cancel: &CancellationToken,
    ) -> DbResult<ProviderConnection> {
        cancellable(
            "connect",
            cancel,
            connection::open(self.kind, config, mode, self.settings.connect_timeout()),
        )
        .await
    }

    pub async fn check_connection(
        &self,
        config: &ProviderConnectionConfig,
        cancel: &CancellationToken,
    ) -> DbResult<bool> {
        match self.connect(config, ExecutionMode::ReadOnly, cancel).await {
            Ok(conn) => {
                conn.close_quietly().await;
                Ok(true)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                debug!(kind = %self.kind, error = %e, "Connection check failed");
                Ok(false)
            }
        }
    }

    /// Apply the query timeout and cancellation to a discovery step.
    async fn bounded<T>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        fut: impl Future<Output = DbResult<T>>,
    ) -> DbResult<T> {
        let limit = self.settings.query_timeout();
        cancellable(operation, cancel, async {
            match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(DbError::timeout(operation, limit.as_secs())),
            }
        })
        .await
    }

    /// Cache-or-discover policy for the server list.
    ///
    /// `discover` is only awaited on a miss or a forced refresh. Fresh results
    /// are merged into the previous cache contents so servers seen repeatedly
    /// gain weight.
    pub async fn servers_cached_or(
        &self,
        force_refresh: bool,
        cancel: &CancellationToken,
        discover: impl Future<Output = DbResult<Vec<ServerInfo>>>,
    ) -> DbResult<Vec<ServerInfo>> {
        if !force_refresh {
            let cached: Vec<ServerInfo> = file_cache::load(&self.server_cache, cancel).await?;
            if !cached.is_empty() {
                debug!(kind = %self.kind, count = cached.len(), "Using cached server list");
                return Ok(cached);
            }
        }

        let discovered = discover.await?;
        info!(
            kind = %self.kind,
            count = discovered.len(),
            forced = force_refresh,
            "Refreshed server list"
        );
        file_cache::save_or_update(
            &self.server_cache,
            |previous: Vec<ServerInfo>| merge_discovered_servers(&previous, discovered),
            cancel,
        )
        .await
    }

    /// Identify the bound server. `None` when no connection is bound.
    pub async fn probe_bound_server(
        &self,
        cancel: &CancellationToken,
    ) -> DbResult<Option<ServerInfo>> {
        let Some(config) = &self.connection else {
            return Ok(None);
        };
        let fallback = config.host().unwrap_or_else(|| "local".to_string());

        let mut conn = self
            .connect(config, ExecutionMode::ReadOnly, cancel)
            .await
            .map_err(discovery_error)?;
        let result = self
            .bounded(
                "server probe",
                cancel,
                SchemaInspector::probe_server(&mut conn, &fallback),
            )
            .await;
        release(conn, &result).await;
        result.map(Some).map_err(discovery_error)
    }

    pub async fn databases(
        &self,
        config: &ProviderConnectionConfig,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<DatabaseInfo>> {
        let mut conn = self
            .connect(config, ExecutionMode::ReadOnly, cancel)
            .await
            .map_err(discovery_error)?;
        let result = self
            .bounded(
                "database listing",
                cancel,
                SchemaInspector::list_databases(&mut conn),
            )
            .await;
        release(conn, &result).await;
        result.map_err(discovery_error)
    }

    pub async fn databases_on_server(
        &self,
        server_name: &str,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<DatabaseInfo>> {
        let base = self.connection.as_ref().ok_or_else(|| {
            DbError::invalid_input(format!(
                "No connection is bound to this provider; cannot reach server '{}'",
                server_name
            ))
        })?;
        let config = base.with_server(server_name).map_err(DbError::invalid_input)?;
        self.databases(&config, cancel).await
    }

    pub async fn schema(
        &self,
        config: &ProviderConnectionConfig,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> DbResult<SchemaModel> {
        let key = config.cache_key();
        if !force_refresh {
            let cached: SchemaCache = file_cache::load(&self.schema_cache, cancel).await?;
            if let Some(schema) = cached.get(&key).filter(|s| !s.is_empty()) {
                debug!(kind = %self.kind, key = %key, "Using cached schema");
                return Ok(schema.clone());
            }
        }

        let mut conn = self
            .connect(config, ExecutionMode::ReadOnly, cancel)
            .await
            .map_err(discovery_error)?;
        let result = self
            .bounded(
                "schema introspection",
                cancel,
                SchemaInspector::introspect(&mut conn),
            )
            .await;
        release(conn, &result).await;
        let schema = result.map_err(discovery_error)?;

        info!(
            kind = %self.kind,
            database = %schema.database,
            tables = schema.tables.len(),
            "Refreshed schema"
        );
        let stored = schema.clone();
        file_cache::save_or_update(
            &self.schema_cache,
            move |mut cache: SchemaCache| {
                cache.insert(key, stored);
                cache
            },
            cancel,
        )
        .await?;
        Ok(schema)
    }

    pub async fn execute(
        &self,
        config: &ProviderConnectionConfig,
        request: &ExecuteRequest,
        cancel: &CancellationToken,
    ) -> DbResult<ExecutionResult> {
        let started = Instant::now();
        let mut result = ExecutionResult::for_request(request);

        if request.sql.trim().is_empty() {
            return Err(DbError::invalid_input("No SQL statement provided"));
        }

        let decision = match self.policy.check(&request.sql, self.kind, request.mode) {
            Ok(decision) => decision,
            Err(reason) => {
                result.elapsed_ms = started.elapsed().as_millis() as u64;
                result.error_message = Some(reason.clone());
                warn!(
                    kind = %self.kind,
                    mode = %request.mode,
                    user_query = request.user_query.as_deref().unwrap_or_default(),
                    reason = %reason,
                    "Statement rejected"
                );
                return Err(DbError::execution(reason, result));
            }
        };

        let params = request.param_values();
        let outcome = async {
            let mut conn = self.connect(config, request.mode, cancel).await?;
            let run = cancellable(
                "execute",
                cancel,
                self.executor
                    .run(&mut conn, &request.sql, &params, decision.returns_rows),
            )
            .await;
            release(conn, &run).await;
            run
        }
        .await;
        result.elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(outcome) => {
                debug!(
                    kind = %self.kind,
                    rows = outcome.rows.len(),
                    rows_affected = ?outcome.rows_affected,
                    elapsed_ms = result.elapsed_ms,
                    "Statement executed"
                );
                result.columns = outcome.columns;
                result.rows = outcome.rows;
                result.rows_affected = outcome.rows_affected;
                result.truncated = outcome.truncated;
                Ok(result)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(
                    kind = %self.kind,
                    mode = %request.mode,
                    user_query = request.user_query.as_deref().unwrap_or_default(),
                    error = %e,
                    "Execution failed"
                );
                Err(e.into_execution(result))
            }
        }
    }
}

/// Close a connection after use. A cancelled operation may have left the
/// protocol mid-stream, so the connection is dropped without a goodbye.
async fn release<T>(conn: ProviderConnection, outcome: &DbResult<T>) {
    match outcome {
        Err(e) if e.is_cancelled() => drop(conn),
        _ => conn.close_quietly().await,
    }
}

/// Driver faults during discovery surface as execution errors with an empty result.
fn discovery_error(error: DbError) -> DbError {
    error.into_execution(ExecutionResult::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn core(dir: &TempDir) -> ProviderCore {
        let settings = ProviderSettings {
            cache_root: Some(dir.path().to_path_buf()),
            ..ProviderSettings::default()
        };
        ProviderCore::new(BackendKind::Sqlite, Arc::new(settings))
    }

    #[test]
    fn test_cache_files_follow_settings() {
        let dir = TempDir::new().unwrap();
        let core = core(&dir);
        assert_eq!(
            core.server_cache_file(),
            dir.path().join("sqlite").join("sqlite.json")
        );
        let core = core.with_schema_cache(dir.path().join("p.json"));
        assert_eq!(core.schema_cache_file(), dir.path().join("p.json"));
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = cancellable("op", &cancel, async { Ok(1) }).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_execute_rejects_empty_sql() {
        let dir = TempDir::new().unwrap();
        let config = ProviderConnectionConfig::new("sqlite::memory:");
        let err = core(&dir)
            .execute(&config, &ExecuteRequest::new("   "), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_databases_on_server_requires_binding() {
        let dir = TempDir::new().unwrap();
        let err = core(&dir)
            .databases_on_server("db01", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_forced_refresh_runs_discovery() {
        let dir = TempDir::new().unwrap();
        let core = core(&dir);
        let cancel = CancellationToken::new();

        let first = core
            .servers_cached_or(false, &cancel, async { Ok(vec![ServerInfo::new("a", "SQLite")]) })
            .await
            .unwrap();
        assert_eq!(first[0].weight, 1);

        // warm cache: the discovery future must not run
        let cached = core
            .servers_cached_or(false, &cancel, async {
                Err::<Vec<ServerInfo>, _>(DbError::internal("discovery should not run"))
            })
            .await
            .unwrap();
        assert_eq!(cached, first);

        let forced = core
            .servers_cached_or(true, &cancel, async { Ok(vec![ServerInfo::new("a", "SQLite")]) })
            .await
            .unwrap();
        assert_eq!(forced[0].weight, 2);
    }
}

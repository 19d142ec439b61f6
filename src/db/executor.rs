//! Statement execution engine.
//!
//! This module runs one SQL batch on an open [`ProviderConnection`] with support for:
//! - Parameterized statements (bound positionally)
//! - Row limits (enforced via streaming - only fetches needed rows)
//! - Statement timeouts
//!
//! # Architecture
//!
//! The executor uses backend-specific implementations organized in submodules:
//! - `mysql`, `postgres`, `sqlite`: sqlx connections
//! - `sqlserver`: tiberius client
//!
//! Each submodule provides identical functionality adapted to the driver's type system.

use crate::config::{DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT};
use crate::db::connection::ProviderConnection;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Rows or affected-row count produced by one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
    pub rows_affected: Option<u64>,
    pub truncated: bool,
}

/// Statement executor with a row limit and a per-statement timeout.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    query_timeout: Duration,
    row_limit: u32,
}

impl QueryExecutor {
    /// Create a new executor. The row limit is clamped to `[1, MAX_ROW_LIMIT]`.
    pub fn new(query_timeout: Duration, row_limit: u32) -> Self {
        Self {
            query_timeout,
            row_limit: row_limit.clamp(1, MAX_ROW_LIMIT),
        }
    }

    pub fn row_limit(&self) -> u32 {
        self.row_limit
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Run `sql` on `conn`.
    ///
    /// When `returns_rows` is set the result set is streamed up to the row limit;
    /// otherwise the statement is executed for its affected-row count.
    pub async fn run(
        &self,
        conn: &mut ProviderConnection,
        sql: &str,
        params: &[QueryParam],
        returns_rows: bool,
    ) -> DbResult<ExecutionOutcome> {
        debug!(
            kind = %conn.kind(),
            params = params.len(),
            limit = self.row_limit,
            timeout_secs = self.query_timeout.as_secs(),
            returns_rows,
            "Executing statement"
        );

        let limit = self.row_limit;
        let t = self.query_timeout;

        if returns_rows {
            // An empty result has no first row to name the columns, so fall back
            // to statement metadata.
            let outcome = match conn {
                ProviderConnection::MySql(c) => {
                    let mut outcome =
                        process_rows(mysql::fetch_rows(c, sql, params, limit, t).await?, limit);
                    if outcome.columns.is_empty() {
                        outcome.columns = describe_columns(sqlx::Executor::describe(&mut *c, sql), t).await;
                    }
                    outcome
                }
                ProviderConnection::Postgres(c) => {
                    let mut outcome =
                        process_rows(postgres::fetch_rows(c, sql, params, limit, t).await?, limit);
                    if outcome.columns.is_empty() {
                        outcome.columns = describe_columns(sqlx::Executor::describe(&mut *c, sql), t).await;
                    }
                    outcome
                }
                ProviderConnection::Sqlite(c) => {
                    let mut outcome =
                        process_rows(sqlite::fetch_rows(c, sql, params, limit, t).await?, limit);
                    if outcome.columns.is_empty() {
                        outcome.columns = describe_columns(sqlx::Executor::describe(&mut *c, sql), t).await;
                    }
                    outcome
                }
                ProviderConnection::SqlServer(c) => {
                    let (rows, columns) =
                        sqlserver::fetch_rows(c, sql, params, limit, t).await?;
                    let mut outcome = process_rows(rows, limit);
                    if outcome.columns.is_empty() {
                        outcome.columns = columns;
                    }
                    outcome
                }
            };
            return Ok(outcome);
        }

        let rows_affected = match conn {
            ProviderConnection::MySql(c) => mysql::execute_write(c, sql, params, t).await?,
            ProviderConnection::Postgres(c) => postgres::execute_write(c, sql, params, t).await?,
            ProviderConnection::Sqlite(c) => sqlite::execute_write(c, sql, params, t).await?,
            ProviderConnection::SqlServer(c) => sqlserver::execute_write(c, sql, params, t).await?,
        };

        Ok(ExecutionOutcome {
            rows_affected: Some(rows_affected),
            ..Default::default()
        })
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            DEFAULT_ROW_LIMIT,
        )
    }
}

/// Convert fetched rows (at most `row_limit + 1`) into an outcome.
fn process_rows<R: RowToJson>(rows: Vec<R>, row_limit: u32) -> ExecutionOutcome {
    let Some(first) = rows.first() else {
        return ExecutionOutcome::default();
    };

    let columns = first.column_names();
    let total_rows = rows.len();
    let truncated = total_rows > row_limit as usize;

    let json_rows: Vec<Vec<JsonValue>> = rows
        .iter()
        .take(row_limit as usize)
        .map(|r| r.to_json_row())
        .collect();

    if truncated {
        warn!(limit = row_limit, "Result truncated at row limit");
    }

    ExecutionOutcome {
        columns,
        rows: json_rows,
        rows_affected: None,
        truncated,
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> DbResult<Vec<R>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(DbError::from)?);
    }
    Ok(rows)
}

/// Result column names from the driver's statement description. Metadata only:
/// a failed describe yields no names rather than failing the call.
async fn describe_columns<DB>(
    describe: futures_util::future::BoxFuture<'_, Result<sqlx::Describe<DB>, sqlx::Error>>,
    query_timeout: Duration,
) -> Vec<String>
where
    DB: sqlx::Database,
{
    use sqlx::Column;

    match timeout(query_timeout, describe).await {
        Ok(Ok(described)) => described
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        Ok(Err(e)) => {
            debug!(error = %e, "Could not describe result columns");
            Vec::new()
        }
        Err(_) => Vec::new(),
    }
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs())
}

// =============================================================================
// Backend-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its driver.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use sqlx::Executor;
    use sqlx::mysql::{MySqlArguments, MySqlConnection, MySqlRow};

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        row_limit: u32,
        query_timeout: Duration,
    ) -> DbResult<Vec<MySqlRow>> {
        // Without params, use the text protocol so statements that cannot be prepared still run
        let fetch_limit = row_limit as usize + 1;
        let rows_future = if params.is_empty() {
            let stream = (&mut *conn).fetch(sql);
            stream.take(fetch_limit).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            let stream = query.fetch(&mut *conn);
            stream.take(fetch_limit).collect::<Vec<_>>()
        };

        match timeout(query_timeout, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute_write(
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            timeout(query_timeout, (&mut *conn).execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            timeout(query_timeout, query.execute(&mut *conn)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::Executor;
    use sqlx::postgres::{PgArguments, PgConnection, PgRow};

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        row_limit: u32,
        query_timeout: Duration,
    ) -> DbResult<Vec<PgRow>> {
        let fetch_limit = row_limit as usize + 1;
        let rows_future = if params.is_empty() {
            let stream = (&mut *conn).fetch(sql);
            stream.take(fetch_limit).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            let stream = query.fetch(&mut *conn);
            stream.take(fetch_limit).collect::<Vec<_>>()
        };

        match timeout(query_timeout, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute_write(
        conn: &mut PgConnection,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            timeout(query_timeout, (&mut *conn).execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            timeout(query_timeout, query.execute(&mut *conn)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::Executor;
    use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        row_limit: u32,
        query_timeout: Duration,
    ) -> DbResult<Vec<SqliteRow>> {
        let fetch_limit = row_limit as usize + 1;
        let rows_future = if params.is_empty() {
            let stream = (&mut *conn).fetch(sql);
            stream.take(fetch_limit).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            let stream = query.fetch(&mut *conn);
            stream.take(fetch_limit).collect::<Vec<_>>()
        };

        match timeout(query_timeout, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute_write(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            timeout(query_timeout, (&mut *conn).execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            timeout(query_timeout, query.execute(&mut *conn)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
        param: &'q QueryParam,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
        match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
        }
    }
}

mod sqlserver {
    use super::*;
    use crate::db::connection::SqlServerClient;
    use futures_util::TryStreamExt;

    pub async fn fetch_rows(
        client: &mut SqlServerClient,
        sql: &str,
        params: &[QueryParam],
        row_limit: u32,
        query_timeout: Duration,
    ) -> DbResult<(Vec<tiberius::Row>, Vec<String>)> {
        let fetch_limit = row_limit as usize + 1;
        let rows_future = async {
            let mut stream = build_query(sql, params).query(client).await?;
            let columns: Vec<String> = stream
                .columns()
                .await?
                .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default();
            let mut rows = stream.into_row_stream();
            let mut out = Vec::new();
            while out.len() < fetch_limit {
                match rows.try_next().await? {
                    Some(row) => out.push(row),
                    None => break,
                }
            }
            Ok::<_, DbError>((out, columns))
        };

        match timeout(query_timeout, rows_future).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute_write(
        client: &mut SqlServerClient,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let query = build_query(sql, params);
        match timeout(query_timeout, query.execute(client)).await {
            Ok(Ok(r)) => Ok(r.total()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }

    /// Parameters are referenced as `@P1`, `@P2`, ... in the statement text.
    fn build_query<'a>(sql: &'a str, params: &[QueryParam]) -> tiberius::Query<'a> {
        let mut query = tiberius::Query::new(sql);
        for param in params {
            match param {
                QueryParam::Null => query.bind(Option::<String>::None),
                QueryParam::Bool(v) => query.bind(*v),
                QueryParam::Int(v) => query.bind(*v),
                QueryParam::Float(v) => query.bind(*v),
                QueryParam::String(v) => query.bind(v.clone()),
                QueryParam::Bytes(v) => query.bind(v.clone()),
            }
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackendKind, ExecutionMode, ProviderConnectionConfig};
    use tempfile::TempDir;

    #[test]
    fn test_executor_defaults() {
        let executor = QueryExecutor::default();
        assert_eq!(
            executor.query_timeout(),
            Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS)
        );
        assert_eq!(executor.row_limit(), DEFAULT_ROW_LIMIT);
    }

    #[test]
    fn test_executor_limit_clamped() {
        assert_eq!(
            QueryExecutor::new(Duration::from_secs(30), 99999).row_limit(),
            MAX_ROW_LIMIT
        );
        assert_eq!(QueryExecutor::new(Duration::from_secs(30), 0).row_limit(), 1);
    }

    async fn sqlite_conn(dir: &TempDir) -> ProviderConnection {
        let path = dir.path().join("exec.db");
        let config = ProviderConnectionConfig::new(format!("sqlite:{}", path.display()));
        crate::db::connection::open(
            BackendKind::Sqlite,
            &config,
            ExecutionMode::Write,
            Duration::from_secs(5),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_run_write_then_read_with_truncation() {
        let dir = TempDir::new().unwrap();
        let mut conn = sqlite_conn(&dir).await;
        let executor = QueryExecutor::new(Duration::from_secs(5), 2);

        executor
            .run(
                &mut conn,
                "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, data BLOB)",
                &[],
                false,
            )
            .await
            .unwrap();
        let inserted = executor
            .run(
                &mut conn,
                "INSERT INTO items (name, data) VALUES (?, ?), ('b', NULL), ('c', NULL)",
                &[
                    QueryParam::String("a".into()),
                    QueryParam::Bytes(vec![0xFF, 0xFE, 0x00, 0x01]),
                ],
                false,
            )
            .await
            .unwrap();
        assert_eq!(inserted.rows_affected, Some(3));

        let outcome = executor
            .run(
                &mut conn,
                "SELECT id, name, data, COUNT(*) OVER () AS total FROM items ORDER BY id",
                &[],
                true,
            )
            .await
            .unwrap();
        assert_eq!(outcome.columns, vec!["id", "name", "data", "total"]);
        assert_eq!(outcome.rows.len(), 2);
        assert!(outcome.truncated);
        assert_eq!(outcome.rows[0][0], serde_json::json!(1));
        assert_eq!(outcome.rows[0][1], serde_json::json!("a"));
        assert_eq!(outcome.rows[0][2], serde_json::json!("//4AAQ=="));
        assert_eq!(outcome.rows[0][3], serde_json::json!(3));
        assert_eq!(outcome.rows[1][2], serde_json::Value::Null);

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_result_keeps_column_names() {
        let dir = TempDir::new().unwrap();
        let mut conn = sqlite_conn(&dir).await;
        let executor = QueryExecutor::default();
        executor
            .run(
                &mut conn,
                "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT)",
                &[],
                false,
            )
            .await
            .unwrap();

        let outcome = executor
            .run(&mut conn, "SELECT id, customer FROM orders", &[], true)
            .await
            .unwrap();
        assert_eq!(outcome.columns, vec!["id", "customer"]);
        assert!(outcome.rows.is_empty());
        assert!(!outcome.truncated);

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_reports_driver_errors() {
        let dir = TempDir::new().unwrap();
        let mut conn = sqlite_conn(&dir).await;
        let err = QueryExecutor::default()
            .run(&mut conn, "SELECT * FROM no_such_table", &[], true)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Database { .. }));
        conn.close().await.unwrap();
    }
}

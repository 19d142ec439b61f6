//! Execution-mode gate.
//!
//! Classifies SQL with [sqlparser](https://docs.rs/sqlparser/) using the dialect of
//! the target backend, then decides whether the statements may run under the
//! requested [`ExecutionMode`]. Classification is AST-based so that no write can
//! slip through formatting tricks or comments.
//!
//! The gate runs before any connection is opened.

use crate::models::{BackendKind, ExecutionMode};
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::{Dialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use std::collections::BTreeSet;

/// Category of a SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// SELECT, VALUES, TABLE and set operations over them
    Query,
    /// SHOW ... and DESCRIBE
    Show,
    /// EXPLAIN of a read-only statement
    Explain,
    /// INSERT, UPDATE, DELETE, MERGE, COPY, SELECT INTO
    DmlWrite,
    /// CREATE, DROP, ALTER, TRUNCATE, COMMENT
    Ddl,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT, RELEASE
    Transaction,
    /// CALL, EXECUTE, PREPARE
    ProcedureCall,
    /// GRANT, REVOKE, SET, USE, VACUUM, PRAGMA, ...
    Administrative,
    Unknown,
}

impl StatementKind {
    /// Kinds that can never change data or server state, and so are the only
    /// ones a read-only policy may admit.
    pub const READ_ONLY_ELIGIBLE: [StatementKind; 4] = [
        StatementKind::Query,
        StatementKind::Show,
        StatementKind::Explain,
        StatementKind::Transaction,
    ];

    pub fn is_read_only_eligible(self) -> bool {
        Self::READ_ONLY_ELIGIBLE.contains(&self)
    }
}

/// Classification of a single parsed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementClass {
    pub kind: StatementKind,
    /// Operation label used in error messages (e.g. "DROP", "SELECT INTO")
    pub operation: &'static str,
}

/// Outcome of passing SQL through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub statements: Vec<StatementClass>,
    /// Whether the last statement produces a result set
    pub returns_rows: bool,
}

/// Which statement kinds may run in read-only mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub read_only_allowed: BTreeSet<StatementKind>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            read_only_allowed: [
                StatementKind::Query,
                StatementKind::Show,
                StatementKind::Explain,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl ExecutionPolicy {
    /// Create a policy allowing `kinds` in read-only mode. Kinds that are not
    /// read-only eligible are dropped.
    pub fn new(kinds: impl IntoIterator<Item = StatementKind>) -> Self {
        Self {
            read_only_allowed: kinds
                .into_iter()
                .filter(|k| k.is_read_only_eligible())
                .collect(),
        }
    }

    /// Whether `kind` may run in read-only mode. Ineligible kinds are refused
    /// even when present in `read_only_allowed`.
    pub fn allows(&self, kind: StatementKind) -> bool {
        kind.is_read_only_eligible() && self.read_only_allowed.contains(&kind)
    }

    /// Decide whether `sql` may run under `mode` on `backend`.
    ///
    /// Returns the rejection message on refusal. SQL that does not parse is
    /// rejected in read-only mode and passed through in write mode, where the
    /// driver gets the final word.
    pub fn check(
        &self,
        sql: &str,
        backend: BackendKind,
        mode: ExecutionMode,
    ) -> Result<GateDecision, String> {
        let dialect = get_dialect(backend);
        let statements = match Parser::parse_sql(dialect.as_ref(), sql) {
            Ok(statements) => statements,
            Err(e) => {
                return match mode {
                    ExecutionMode::ReadOnly => Err(format!(
                        "Failed to parse SQL statement: {}. Only statements recognised as \
                         read-only can run in read-only mode.",
                        e
                    )),
                    ExecutionMode::Write => Ok(GateDecision {
                        statements: Vec::new(),
                        returns_rows: leading_keyword_returns_rows(sql),
                    }),
                };
            }
        };

        if statements.is_empty() {
            return Err("Empty SQL statement".to_string());
        }

        let classes: Vec<StatementClass> = statements.iter().map(classify_statement).collect();

        if mode.is_read_only() {
            if let Some(denied) = classes.iter().find(|c| !self.allows(c.kind)) {
                return Err(format!(
                    "{} statements are not allowed in read-only mode",
                    denied.operation
                ));
            }
        }

        let returns_rows = statements
            .last()
            .map(|stmt| statement_returns_rows(stmt, sql))
            .unwrap_or(false);

        Ok(GateDecision {
            statements: classes,
            returns_rows,
        })
    }
}

/// Get the appropriate SQL dialect for the given backend.
fn get_dialect(backend: BackendKind) -> Box<dyn Dialect> {
    match backend {
        BackendKind::SqlServer => Box::new(MsSqlDialect {}),
        BackendKind::PostgreSql => Box::new(PostgreSqlDialect {}),
        BackendKind::MySql => Box::new(MySqlDialect {}),
        BackendKind::Sqlite => Box::new(SQLiteDialect {}),
    }
}

fn class(kind: StatementKind, operation: &'static str) -> StatementClass {
    StatementClass { kind, operation }
}

/// Classify a parsed statement.
pub fn classify_statement(stmt: &Statement) -> StatementClass {
    match stmt {
        Statement::Query(query) => {
            if query_writes(query) {
                class(StatementKind::DmlWrite, "SELECT INTO")
            } else {
                class(StatementKind::Query, "SELECT")
            }
        }

        Statement::ShowTables { .. } => class(StatementKind::Show, "SHOW TABLES"),
        Statement::ShowColumns { .. } => class(StatementKind::Show, "SHOW COLUMNS"),
        Statement::ShowDatabases { .. } => class(StatementKind::Show, "SHOW DATABASES"),
        Statement::ShowSchemas { .. } => class(StatementKind::Show, "SHOW SCHEMAS"),
        Statement::ShowCreate { .. } => class(StatementKind::Show, "SHOW CREATE"),
        Statement::ShowFunctions { .. } => class(StatementKind::Show, "SHOW FUNCTIONS"),
        Statement::ShowVariable { .. } => class(StatementKind::Show, "SHOW VARIABLE"),
        Statement::ShowVariables { .. } => class(StatementKind::Show, "SHOW VARIABLES"),
        Statement::ShowStatus { .. } => class(StatementKind::Show, "SHOW STATUS"),
        Statement::ShowCollation { .. } => class(StatementKind::Show, "SHOW COLLATION"),
        Statement::ExplainTable { .. } => class(StatementKind::Show, "DESCRIBE"),

        // EXPLAIN ANALYZE runs the statement, so EXPLAIN inherits the class of a write
        Statement::Explain { statement, .. } => {
            let inner = classify_statement(statement);
            match inner.kind {
                StatementKind::Query | StatementKind::Show | StatementKind::Explain => {
                    class(StatementKind::Explain, "EXPLAIN")
                }
                _ => inner,
            }
        }

        Statement::Insert(_) => class(StatementKind::DmlWrite, "INSERT"),
        Statement::Update { .. } => class(StatementKind::DmlWrite, "UPDATE"),
        Statement::Delete(_) => class(StatementKind::DmlWrite, "DELETE"),
        Statement::Merge { .. } => class(StatementKind::DmlWrite, "MERGE"),
        Statement::Copy { .. } => class(StatementKind::DmlWrite, "COPY"),
        Statement::CopyIntoSnowflake { .. } => class(StatementKind::DmlWrite, "COPY INTO"),

        Statement::CreateTable { .. } => class(StatementKind::Ddl, "CREATE TABLE"),
        Statement::CreateView { .. } => class(StatementKind::Ddl, "CREATE VIEW"),
        Statement::CreateIndex(_) => class(StatementKind::Ddl, "CREATE INDEX"),
        Statement::CreateSchema { .. } => class(StatementKind::Ddl, "CREATE SCHEMA"),
        Statement::CreateDatabase { .. } => class(StatementKind::Ddl, "CREATE DATABASE"),
        Statement::CreateSequence { .. } => class(StatementKind::Ddl, "CREATE SEQUENCE"),
        Statement::CreateType { .. } => class(StatementKind::Ddl, "CREATE TYPE"),
        Statement::CreateFunction { .. } => class(StatementKind::Ddl, "CREATE FUNCTION"),
        Statement::CreateProcedure { .. } => class(StatementKind::Ddl, "CREATE PROCEDURE"),
        Statement::CreateTrigger { .. } => class(StatementKind::Ddl, "CREATE TRIGGER"),
        Statement::CreateRole { .. } => class(StatementKind::Ddl, "CREATE ROLE"),
        Statement::CreateVirtualTable { .. } => class(StatementKind::Ddl, "CREATE VIRTUAL TABLE"),
        Statement::CreateExtension { .. } => class(StatementKind::Ddl, "CREATE EXTENSION"),
        Statement::CreatePolicy { .. } => class(StatementKind::Ddl, "CREATE POLICY"),

        Statement::AlterTable { .. } => class(StatementKind::Ddl, "ALTER TABLE"),
        Statement::AlterView { .. } => class(StatementKind::Ddl, "ALTER VIEW"),
        Statement::AlterIndex { .. } => class(StatementKind::Ddl, "ALTER INDEX"),
        Statement::AlterSchema { .. } => class(StatementKind::Ddl, "ALTER SCHEMA"),
        Statement::AlterRole { .. } => class(StatementKind::Ddl, "ALTER ROLE"),
        Statement::AlterPolicy { .. } => class(StatementKind::Ddl, "ALTER POLICY"),
        Statement::AlterType { .. } => class(StatementKind::Ddl, "ALTER TYPE"),

        Statement::Drop { .. } => class(StatementKind::Ddl, "DROP"),
        Statement::DropFunction { .. } => class(StatementKind::Ddl, "DROP FUNCTION"),
        Statement::DropProcedure { .. } => class(StatementKind::Ddl, "DROP PROCEDURE"),
        Statement::DropTrigger { .. } => class(StatementKind::Ddl, "DROP TRIGGER"),
        Statement::DropPolicy { .. } => class(StatementKind::Ddl, "DROP POLICY"),

        Statement::Truncate { .. } => class(StatementKind::Ddl, "TRUNCATE"),
        Statement::Comment { .. } => class(StatementKind::Ddl, "COMMENT"),

        Statement::StartTransaction { .. } => class(StatementKind::Transaction, "BEGIN"),
        Statement::Commit { .. } => class(StatementKind::Transaction, "COMMIT"),
        Statement::Rollback { .. } => class(StatementKind::Transaction, "ROLLBACK"),
        Statement::Savepoint { .. } => class(StatementKind::Transaction, "SAVEPOINT"),
        Statement::ReleaseSavepoint { .. } => class(StatementKind::Transaction, "RELEASE SAVEPOINT"),

        Statement::Call { .. } => class(StatementKind::ProcedureCall, "CALL"),
        Statement::Execute { .. } => class(StatementKind::ProcedureCall, "EXECUTE"),
        Statement::Prepare { .. } => class(StatementKind::ProcedureCall, "PREPARE"),
        Statement::Deallocate { .. } => class(StatementKind::ProcedureCall, "DEALLOCATE"),

        Statement::Grant { .. } => class(StatementKind::Administrative, "GRANT"),
        Statement::Revoke { .. } => class(StatementKind::Administrative, "REVOKE"),
        Statement::Deny { .. } => class(StatementKind::Administrative, "DENY"),
        Statement::Set(_) => class(StatementKind::Administrative, "SET"),
        Statement::Use(_) => class(StatementKind::Administrative, "USE"),
        Statement::Kill { .. } => class(StatementKind::Administrative, "KILL"),
        Statement::Vacuum { .. } => class(StatementKind::Administrative, "VACUUM"),
        Statement::Analyze { .. } => class(StatementKind::Administrative, "ANALYZE"),
        Statement::Discard { .. } => class(StatementKind::Administrative, "DISCARD"),
        Statement::LockTables { .. } => class(StatementKind::Administrative, "LOCK"),
        Statement::UnlockTables => class(StatementKind::Administrative, "UNLOCK"),
        Statement::Flush { .. } => class(StatementKind::Administrative, "FLUSH"),
        Statement::Pragma { .. } => class(StatementKind::Administrative, "PRAGMA"),
        Statement::OptimizeTable { .. } => class(StatementKind::Administrative, "OPTIMIZE"),
        Statement::AttachDatabase { .. } => class(StatementKind::Administrative, "ATTACH"),
        Statement::LISTEN { .. } => class(StatementKind::Administrative, "LISTEN"),
        Statement::UNLISTEN { .. } => class(StatementKind::Administrative, "UNLISTEN"),
        Statement::NOTIFY { .. } => class(StatementKind::Administrative, "NOTIFY"),

        _ => class(StatementKind::Unknown, "Unrecognized"),
    }
}

/// Whether a query writes: `SELECT ... INTO`, or a data-modifying statement
/// nested in its body or in one of its CTEs.
fn query_writes(query: &Query) -> bool {
    if let Some(with) = &query.with {
        if with.cte_tables.iter().any(|cte| query_writes(&cte.query)) {
            return true;
        }
    }
    set_expr_writes(&query.body)
}

fn set_expr_writes(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::Query(query) => query_writes(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_writes(left) || set_expr_writes(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => false,
        // INSERT/UPDATE/DELETE/MERGE used as a query body
        _ => true,
    }
}

fn statement_returns_rows(stmt: &Statement, sql: &str) -> bool {
    match classify_statement(stmt).kind {
        StatementKind::Query | StatementKind::Show | StatementKind::Explain => true,
        StatementKind::DmlWrite => {
            // INSERT/UPDATE/DELETE ... RETURNING, and SQL Server's OUTPUT clause
            matches!(stmt, Statement::Query(_)) && !query_is_select_into(stmt)
                || has_keyword(sql, "RETURNING")
                || has_keyword(sql, "OUTPUT")
        }
        StatementKind::Administrative => matches!(stmt, Statement::Pragma { .. }),
        StatementKind::ProcedureCall => true,
        _ => false,
    }
}

fn query_is_select_into(stmt: &Statement) -> bool {
    match stmt {
        Statement::Query(query) => matches!(&*query.body, SetExpr::Select(select) if select.into.is_some()),
        _ => false,
    }
}

fn has_keyword(sql: &str, keyword: &str) -> bool {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| word.eq_ignore_ascii_case(keyword))
}

/// Best guess for SQL the parser does not understand, e.g. vendor-specific T-SQL.
fn leading_keyword_returns_rows(sql: &str) -> bool {
    let first = sql
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .find(|word| !word.is_empty())
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        first.as_str(),
        "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "DESCRIBE" | "PRAGMA" | "VALUES" | "EXEC"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widened_policy_still_rejects_state_changes() {
        let widened = ExecutionPolicy {
            read_only_allowed: [
                StatementKind::Query,
                StatementKind::ProcedureCall,
                StatementKind::Administrative,
                StatementKind::DmlWrite,
            ]
            .into_iter()
            .collect(),
        };
        for sql in [
            "EXEC dbo.purge_orders",
            "GRANT ALL ON orders TO public",
            "DELETE FROM orders",
        ] {
            let err = widened
                .check(sql, BackendKind::SqlServer, ExecutionMode::ReadOnly)
                .unwrap_err();
            assert!(err.contains("read-only"), "{sql}: {err}");
        }

        let built = ExecutionPolicy::new([StatementKind::Query, StatementKind::ProcedureCall]);
        assert_eq!(
            built.read_only_allowed,
            [StatementKind::Query].into_iter().collect()
        );
        assert!(
            built
                .check("SELECT 1", BackendKind::SqlServer, ExecutionMode::ReadOnly)
                .is_ok()
        );
    }

    fn read_only(sql: &str, backend: BackendKind) -> Result<GateDecision, String> {
        ExecutionPolicy::default().check(sql, backend, ExecutionMode::ReadOnly)
    }

    #[test]
    fn test_select_allowed_on_every_backend() {
        for backend in BackendKind::ALL {
            let decision = read_only("SELECT * FROM users WHERE id = 1", backend).unwrap();
            assert!(decision.returns_rows);
            assert_eq!(decision.statements[0].kind, StatementKind::Query);
        }
    }

    #[test]
    fn test_writes_rejected_in_read_only() {
        let cases = [
            ("INSERT INTO users VALUES (1)", "INSERT"),
            ("UPDATE users SET name = 'x'", "UPDATE"),
            ("DELETE FROM users", "DELETE"),
            ("DROP TABLE users", "DROP"),
            ("CREATE TABLE t (id INT)", "CREATE TABLE"),
            ("COMMIT", "COMMIT"),
        ];
        for (sql, operation) in cases {
            let err = read_only(sql, BackendKind::PostgreSql).unwrap_err();
            assert!(err.contains(operation), "{sql}: {err}");
            assert!(err.contains("read-only"));
        }
    }

    #[test]
    fn test_multiple_statements_blocked_if_any_writes() {
        assert!(read_only("SELECT 1; DELETE FROM users", BackendKind::Sqlite).is_err());
    }

    #[test]
    fn test_select_into_is_a_write() {
        let err = read_only("SELECT * INTO archive FROM users", BackendKind::SqlServer).unwrap_err();
        assert!(err.contains("SELECT INTO"));
    }

    #[test]
    fn test_data_modifying_cte_is_a_write() {
        let sql = "WITH gone AS (DELETE FROM users RETURNING id) SELECT * FROM gone";
        assert!(read_only(sql, BackendKind::PostgreSql).is_err());
    }

    #[test]
    fn test_read_only_cte_and_union_allowed() {
        let sql = "WITH a AS (SELECT 1 AS x) SELECT x FROM a UNION ALL SELECT 2";
        assert!(read_only(sql, BackendKind::PostgreSql).is_ok());
    }

    #[test]
    fn test_explain_follows_inner_statement() {
        assert_eq!(
            read_only("EXPLAIN SELECT * FROM users", BackendKind::PostgreSql)
                .unwrap()
                .statements[0]
                .kind,
            StatementKind::Explain
        );
        assert!(read_only("EXPLAIN ANALYZE DELETE FROM users", BackendKind::PostgreSql).is_err());
    }

    #[test]
    fn test_unparseable_sql() {
        let sql = "SELEKT nonsense FROM";
        assert!(read_only(sql, BackendKind::MySql).is_err());

        let decision = ExecutionPolicy::default()
            .check(sql, BackendKind::MySql, ExecutionMode::Write)
            .unwrap();
        assert!(decision.statements.is_empty());
        assert!(!decision.returns_rows);
    }

    #[test]
    fn test_empty_sql_rejected() {
        assert!(
            ExecutionPolicy::default()
                .check("   ", BackendKind::Sqlite, ExecutionMode::Write)
                .is_err()
        );
    }

    #[test]
    fn test_configurable_allow_list() {
        let policy = ExecutionPolicy::new([StatementKind::Query]);
        assert!(
            policy
                .check("EXPLAIN SELECT 1", BackendKind::PostgreSql, ExecutionMode::ReadOnly)
                .is_err()
        );

        let permissive = ExecutionPolicy::new([StatementKind::Query, StatementKind::DmlWrite]);
        assert!(
            permissive
                .check("DELETE FROM t", BackendKind::Sqlite, ExecutionMode::ReadOnly)
                .is_ok()
        );
    }

    #[test]
    fn test_write_mode_row_detection() {
        let policy = ExecutionPolicy::default();
        let insert = policy
            .check("INSERT INTO t VALUES (1)", BackendKind::Sqlite, ExecutionMode::Write)
            .unwrap();
        assert!(!insert.returns_rows);

        let returning = policy
            .check(
                "INSERT INTO t (a) VALUES (1) RETURNING id",
                BackendKind::PostgreSql,
                ExecutionMode::Write,
            )
            .unwrap();
        assert!(returning.returns_rows);

        let pragma = policy
            .check("PRAGMA table_info('t')", BackendKind::Sqlite, ExecutionMode::Write)
            .unwrap();
        assert!(pragma.returns_rows);
    }
}

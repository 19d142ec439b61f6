//! Schema introspection module.
//!
//! This module discovers servers, databases and table schemas on an open
//! [`ProviderConnection`] for SQL Server, PostgreSQL, MySQL and SQLite.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, mysql, sqlite, sqlserver), each producing flat
//! [`ColumnRow`]/[`ForeignKeyRow`] lists that [`assemble_schema`] turns into a
//! consistent [`SchemaModel`].

use crate::db::connection::ProviderConnection;
use crate::error::DbResult;
use crate::models::{
    ColumnInfo, DatabaseInfo, ForeignKeyTarget, RelationInfo, SchemaModel, ServerInfo, TableInfo,
};
use std::collections::HashMap;
use tracing::debug;

/// One column as reported by a catalog query.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRow {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
}

/// One foreign-key column pair as reported by a catalog query.
///
/// `to_column` is `None` when the catalog leaves the target implicit
/// (SQLite `REFERENCES parent` without a column list); it resolves to the
/// target table's primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyRow {
    pub from_schema: String,
    pub from_table: String,
    pub from_column: String,
    pub to_schema: String,
    pub to_table: String,
    pub to_column: Option<String>,
}

/// Build a [`SchemaModel`] from catalog rows.
///
/// Tables keep the order in which their first column appears. Foreign keys
/// whose endpoints are not part of the snapshot (other schemas, missing
/// permissions, dropped objects) are discarded so every relation is resolvable.
pub fn assemble_schema(
    database: impl Into<String>,
    columns: Vec<ColumnRow>,
    foreign_keys: Vec<ForeignKeyRow>,
) -> SchemaModel {
    let mut schema = SchemaModel::new(database);
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for row in columns {
        let key = (row.schema.to_lowercase(), row.table.to_lowercase());
        let pos = *index.entry(key).or_insert_with(|| {
            schema
                .tables
                .push(TableInfo::new(row.schema.clone(), row.table.clone()));
            schema.tables.len() - 1
        });
        let table = &mut schema.tables[pos];
        if table.column(&row.column).is_some() {
            continue;
        }
        table.columns.push(
            ColumnInfo::new(row.column, row.data_type, row.nullable)
                .with_primary_key(row.is_primary_key),
        );
    }

    for fk in foreign_keys {
        let Some(target) = schema.table(&fk.to_schema, &fk.to_table) else {
            continue;
        };
        let to_column = match &fk.to_column {
            Some(col) => target.column(col).map(|c| c.name.clone()),
            None => target.primary_key().first().map(|c| c.to_string()),
        };
        let Some(to_column) = to_column else {
            continue;
        };
        let (to_schema, to_table) = (target.schema.clone(), target.name.clone());

        let Some(&pos) = index.get(&(fk.from_schema.to_lowercase(), fk.from_table.to_lowercase()))
        else {
            continue;
        };
        let source = &mut schema.tables[pos];
        let Some(column) = source
            .columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(&fk.from_column))
        else {
            continue;
        };

        if column.foreign_key.is_none() {
            column.foreign_key = Some(ForeignKeyTarget {
                schema: to_schema.clone(),
                table: to_table.clone(),
                column: to_column.clone(),
            });
        }
        let relation = RelationInfo {
            from_schema: source.schema.clone(),
            from_table: source.name.clone(),
            from_column: column.name.clone(),
            to_schema,
            to_table,
            to_column,
        };
        if !schema.relations.contains(&relation) {
            schema.relations.push(relation);
        }
    }

    schema
}

/// Catalog inspector for discovery operations.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Introspect every user table of the connected database.
    pub async fn introspect(conn: &mut ProviderConnection) -> DbResult<SchemaModel> {
        let schema = match conn {
            ProviderConnection::Postgres(c) => postgres::introspect(c).await?,
            ProviderConnection::MySql(c) => mysql::introspect(c).await?,
            ProviderConnection::Sqlite(c) => sqlite::introspect(c).await?,
            ProviderConnection::SqlServer(c) => sqlserver::introspect(c).await?,
        };
        debug!(
            database = %schema.database,
            tables = schema.tables.len(),
            relations = schema.relations.len(),
            "Introspected schema"
        );
        Ok(schema)
    }

    /// List the databases visible through the connection.
    pub async fn list_databases(conn: &mut ProviderConnection) -> DbResult<Vec<DatabaseInfo>> {
        let databases = match conn {
            ProviderConnection::Postgres(c) => postgres::list_databases(c).await?,
            ProviderConnection::MySql(c) => mysql::list_databases(c).await?,
            ProviderConnection::Sqlite(c) => sqlite::list_databases(c).await?,
            ProviderConnection::SqlServer(c) => sqlserver::list_databases(c).await?,
        };
        debug!(count = databases.len(), "Listed databases");
        Ok(databases)
    }

    /// Identify the server behind the connection.
    ///
    /// `fallback_name` is used when the server does not report a name of its own.
    pub async fn probe_server(
        conn: &mut ProviderConnection,
        fallback_name: &str,
    ) -> DbResult<ServerInfo> {
        match conn {
            ProviderConnection::Postgres(c) => postgres::probe_server(c, fallback_name).await,
            ProviderConnection::MySql(c) => mysql::probe_server(c, fallback_name).await,
            ProviderConnection::Sqlite(c) => sqlite::probe_server(c, fallback_name).await,
            ProviderConnection::SqlServer(c) => sqlserver::probe_server(c, fallback_name).await,
        }
    }
}

// =============================================================================
// SQL Query Templates
// =============================================================================
//
// Centralized SQL queries for schema introspection. Each database has its own
// submodule with queries adapted to its specific system catalogs.

mod queries {
    pub mod postgres {
        pub const CURRENT_DATABASE: &str = "SELECT current_database()::text";

        pub const SERVER_VERSION: &str = "SELECT version()::text";

        pub const LIST_DATABASES: &str = r#"
            SELECT
                datname::text AS name,
                CASE WHEN has_database_privilege(datname, 'CONNECT')
                    THEN pg_database_size(datname)
                END AS size_bytes
            FROM pg_database
            WHERE datistemplate = false
            ORDER BY datname
            "#;

        pub const LIST_COLUMNS: &str = r#"
            SELECT
                c.table_schema::text AS table_schema,
                c.table_name::text AS table_name,
                c.column_name::text AS column_name,
                c.data_type::text AS data_type,
                (c.is_nullable = 'YES') AS is_nullable,
                EXISTS (
                    SELECT 1
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage kcu
                        ON tc.constraint_name = kcu.constraint_name
                        AND tc.table_schema = kcu.table_schema
                        AND tc.table_name = kcu.table_name
                    WHERE tc.constraint_type = 'PRIMARY KEY'
                        AND tc.table_schema = c.table_schema
                        AND tc.table_name = c.table_name
                        AND kcu.column_name = c.column_name
                ) AS is_primary_key
            FROM information_schema.columns c
            JOIN information_schema.tables t
                ON t.table_schema = c.table_schema AND t.table_name = c.table_name
            WHERE t.table_type = 'BASE TABLE'
                AND c.table_schema NOT IN ('pg_catalog', 'information_schema')
            ORDER BY c.table_schema, c.table_name, c.ordinal_position
            "#;

        // Column pairs come from the constraint's own key arrays, so each
        // referencing column maps to its referenced column by position.
        pub const LIST_FOREIGN_KEYS: &str = r#"
            SELECT
                src_ns.nspname::text AS from_schema,
                src.relname::text AS from_table,
                src_col.attname::text AS from_column,
                dst_ns.nspname::text AS to_schema,
                dst.relname::text AS to_table,
                dst_col.attname::text AS to_column
            FROM pg_constraint con
            CROSS JOIN LATERAL unnest(con.conkey, con.confkey)
                WITH ORDINALITY AS k(src_attnum, dst_attnum, position)
            JOIN pg_class src ON src.oid = con.conrelid
            JOIN pg_namespace src_ns ON src_ns.oid = src.relnamespace
            JOIN pg_attribute src_col
                ON src_col.attrelid = con.conrelid AND src_col.attnum = k.src_attnum
            JOIN pg_class dst ON dst.oid = con.confrelid
            JOIN pg_namespace dst_ns ON dst_ns.oid = dst.relnamespace
            JOIN pg_attribute dst_col
                ON dst_col.attrelid = con.confrelid AND dst_col.attnum = k.dst_attnum
            WHERE con.contype = 'f'
                AND src_ns.nspname NOT IN ('pg_catalog', 'information_schema')
            ORDER BY src_ns.nspname, src.relname, con.conname, k.position
            "#;
    }

    pub mod mysql {
        pub const CURRENT_DATABASE: &str = "SELECT DATABASE()";

        pub const SERVER_VERSION: &str =
            "SELECT @@version AS version, @@version_comment AS edition, @@hostname AS host";

        pub const LIST_DATABASES: &str = r#"
            SELECT
                s.SCHEMA_NAME AS name,
                CAST(SUM(COALESCE(t.DATA_LENGTH, 0) + COALESCE(t.INDEX_LENGTH, 0)) AS UNSIGNED) AS size_bytes
            FROM information_schema.SCHEMATA s
            LEFT JOIN information_schema.TABLES t ON t.TABLE_SCHEMA = s.SCHEMA_NAME
            GROUP BY s.SCHEMA_NAME
            ORDER BY s.SCHEMA_NAME
            "#;

        pub const LIST_COLUMNS: &str = r#"
            SELECT
                c.TABLE_SCHEMA AS table_schema,
                c.TABLE_NAME AS table_name,
                c.COLUMN_NAME AS column_name,
                c.COLUMN_TYPE AS data_type,
                c.IS_NULLABLE AS is_nullable,
                c.COLUMN_KEY AS column_key
            FROM information_schema.COLUMNS c
            JOIN information_schema.TABLES t
                ON t.TABLE_SCHEMA = c.TABLE_SCHEMA AND t.TABLE_NAME = c.TABLE_NAME
            WHERE c.TABLE_SCHEMA = DATABASE()
                AND t.TABLE_TYPE = 'BASE TABLE'
            ORDER BY c.TABLE_NAME, c.ORDINAL_POSITION
            "#;

        pub const LIST_FOREIGN_KEYS: &str = r#"
            SELECT
                TABLE_SCHEMA AS from_schema,
                TABLE_NAME AS from_table,
                COLUMN_NAME AS from_column,
                REFERENCED_TABLE_SCHEMA AS to_schema,
                REFERENCED_TABLE_NAME AS to_table,
                REFERENCED_COLUMN_NAME AS to_column
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = DATABASE()
                AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY TABLE_NAME, ORDINAL_POSITION
            "#;
    }

    pub mod sqlite {
        pub const MAIN_FILE: &str = "SELECT file FROM pragma_database_list WHERE name = 'main'";

        pub const SERVER_VERSION: &str = "SELECT sqlite_version()";

        pub const LIST_DATABASES: &str =
            "SELECT name, file FROM pragma_database_list ORDER BY seq";

        pub const LIST_COLUMNS: &str = r#"
            SELECT
                m.name AS table_name,
                p.name AS column_name,
                p.type AS data_type,
                p."notnull" AS not_null,
                p.pk AS pk
            FROM sqlite_master m
            JOIN pragma_table_info(m.name) p
            WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'
            ORDER BY m.name, p.cid
            "#;

        pub const LIST_FOREIGN_KEYS: &str = r#"
            SELECT
                m.name AS from_table,
                f."from" AS from_column,
                f."table" AS to_table,
                f."to" AS to_column
            FROM sqlite_master m
            JOIN pragma_foreign_key_list(m.name) f
            WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'
            ORDER BY m.name, f.id, f.seq
            "#;
    }

    pub mod sqlserver {
        pub const CURRENT_DATABASE: &str = "SELECT CAST(DB_NAME() AS nvarchar(256))";

        pub const SERVER_VERSION: &str = r#"
            SELECT
                CAST(@@SERVERNAME AS nvarchar(256)),
                CAST(SERVERPROPERTY('Edition') AS nvarchar(256)),
                CAST(SERVERPROPERTY('ProductVersion') AS nvarchar(256))
            "#;

        pub const LIST_DATABASES: &str = r#"
            SELECT
                d.name,
                CAST(SUM(CAST(mf.size AS bigint)) * 8192 AS bigint) AS size_bytes
            FROM sys.databases d
            LEFT JOIN sys.master_files mf ON mf.database_id = d.database_id
            GROUP BY d.name
            ORDER BY d.name
            "#;

        pub const LIST_COLUMNS: &str = r#"
            SELECT
                c.TABLE_SCHEMA,
                c.TABLE_NAME,
                c.COLUMN_NAME,
                c.DATA_TYPE,
                CAST(CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS bit) AS is_nullable,
                CAST(CASE WHEN pk.COLUMN_NAME IS NULL THEN 0 ELSE 1 END AS bit) AS is_primary_key
            FROM INFORMATION_SCHEMA.COLUMNS c
            JOIN INFORMATION_SCHEMA.TABLES t
                ON t.TABLE_SCHEMA = c.TABLE_SCHEMA
                AND t.TABLE_NAME = c.TABLE_NAME
                AND t.TABLE_TYPE = 'BASE TABLE'
            LEFT JOIN (
                SELECT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME
                FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
                    ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
                    AND tc.TABLE_SCHEMA = ku.TABLE_SCHEMA
                WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
            ) pk
                ON pk.TABLE_SCHEMA = c.TABLE_SCHEMA
                AND pk.TABLE_NAME = c.TABLE_NAME
                AND pk.COLUMN_NAME = c.COLUMN_NAME
            ORDER BY c.TABLE_SCHEMA, c.TABLE_NAME, c.ORDINAL_POSITION
            "#;

        pub const LIST_FOREIGN_KEYS: &str = r#"
            SELECT
                CAST(OBJECT_SCHEMA_NAME(fkc.parent_object_id) AS nvarchar(256)),
                CAST(OBJECT_NAME(fkc.parent_object_id) AS nvarchar(256)),
                CAST(pc.name AS nvarchar(256)),
                CAST(OBJECT_SCHEMA_NAME(fkc.referenced_object_id) AS nvarchar(256)),
                CAST(OBJECT_NAME(fkc.referenced_object_id) AS nvarchar(256)),
                CAST(rc.name AS nvarchar(256))
            FROM sys.foreign_key_columns fkc
            JOIN sys.columns pc
                ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
            JOIN sys.columns rc
                ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
            ORDER BY 1, 2, fkc.constraint_column_id
            "#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::Row;
    use sqlx::postgres::PgConnection;

    pub async fn introspect(conn: &mut PgConnection) -> DbResult<SchemaModel> {
        let database: String = sqlx::query_scalar(queries::postgres::CURRENT_DATABASE)
            .fetch_one(&mut *conn)
            .await?;

        let columns = sqlx::query(queries::postgres::LIST_COLUMNS)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(|row| ColumnRow {
                schema: row.get("table_schema"),
                table: row.get("table_name"),
                column: row.get("column_name"),
                data_type: row.get("data_type"),
                nullable: row.try_get("is_nullable").unwrap_or(true),
                is_primary_key: row.try_get("is_primary_key").unwrap_or(false),
            })
            .collect();

        let foreign_keys = sqlx::query(queries::postgres::LIST_FOREIGN_KEYS)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(|row| ForeignKeyRow {
                from_schema: row.get("from_schema"),
                from_table: row.get("from_table"),
                from_column: row.get("from_column"),
                to_schema: row.get("to_schema"),
                to_table: row.get("to_table"),
                to_column: row.try_get("to_column").ok(),
            })
            .collect();

        Ok(assemble_schema(database, columns, foreign_keys))
    }

    pub async fn list_databases(conn: &mut PgConnection) -> DbResult<Vec<DatabaseInfo>> {
        let rows = sqlx::query(queries::postgres::LIST_DATABASES)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let size_bytes: Option<i64> = row.try_get("size_bytes").ok().flatten();
                DatabaseInfo::new(name, size_bytes.map(|s| s as u64))
            })
            .collect())
    }

    pub async fn probe_server(conn: &mut PgConnection, fallback_name: &str) -> DbResult<ServerInfo> {
        let version: String = sqlx::query_scalar(queries::postgres::SERVER_VERSION)
            .fetch_one(&mut *conn)
            .await?;
        // "PostgreSQL 16.2 on x86_64-pc-linux-gnu, ..." -> "16.2"
        let short = version.split_whitespace().nth(1).unwrap_or_default();
        Ok(ServerInfo::new(fallback_name, "PostgreSQL").with_version(short))
    }
}

mod mysql {
    use super::*;
    use sqlx::Row;
    use sqlx::mysql::{MySqlConnection, MySqlRow};

    /// Try to get a u64 value from a row, handling MySQL version differences.
    /// MySQL 5.x may return BIGINT (i64), MySQL 8.x returns BIGINT UNSIGNED (u64).
    fn try_get_u64(row: &MySqlRow, column: &str) -> Option<u64> {
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(column) {
            return Some(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(column) {
            return Some(v as u64);
        }
        None
    }

    /// Safely get a string from a MySQL row.
    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_string(row: &MySqlRow, column: &str) -> String {
        get_optional_string(row, column).unwrap_or_default()
    }

    fn get_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(column)
                    .ok()
                    .flatten()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
    }

    pub async fn introspect(conn: &mut MySqlConnection) -> DbResult<SchemaModel> {
        let database: Option<String> = sqlx::query_scalar(queries::mysql::CURRENT_DATABASE)
            .fetch_one(&mut *conn)
            .await?;

        let columns = sqlx::query(queries::mysql::LIST_COLUMNS)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(|row| ColumnRow {
                schema: get_string(row, "table_schema"),
                table: get_string(row, "table_name"),
                column: get_string(row, "column_name"),
                data_type: get_string(row, "data_type"),
                nullable: get_string(row, "is_nullable") == "YES",
                is_primary_key: get_string(row, "column_key") == "PRI",
            })
            .collect();

        let foreign_keys = sqlx::query(queries::mysql::LIST_FOREIGN_KEYS)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(|row| ForeignKeyRow {
                from_schema: get_string(row, "from_schema"),
                from_table: get_string(row, "from_table"),
                from_column: get_string(row, "from_column"),
                to_schema: get_string(row, "to_schema"),
                to_table: get_string(row, "to_table"),
                to_column: get_optional_string(row, "to_column"),
            })
            .collect();

        Ok(assemble_schema(
            database.unwrap_or_default(),
            columns,
            foreign_keys,
        ))
    }

    pub async fn list_databases(conn: &mut MySqlConnection) -> DbResult<Vec<DatabaseInfo>> {
        let rows = sqlx::query(queries::mysql::LIST_DATABASES)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = get_optional_string(row, "name")?;
                Some(DatabaseInfo::new(name, try_get_u64(row, "size_bytes")))
            })
            .collect())
    }

    pub async fn probe_server(
        conn: &mut MySqlConnection,
        fallback_name: &str,
    ) -> DbResult<ServerInfo> {
        let row = sqlx::query(queries::mysql::SERVER_VERSION)
            .fetch_one(&mut *conn)
            .await?;
        let version = get_string(&row, "version");
        let edition = get_optional_string(&row, "edition")
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "MySQL".to_string());
        Ok(ServerInfo::new(fallback_name, edition).with_version(version))
    }
}

mod sqlite {
    use super::*;
    use sqlx::Row;
    use sqlx::sqlite::SqliteConnection;
    use std::path::Path;

    pub const SCHEMA: &str = "main";

    pub async fn introspect(conn: &mut SqliteConnection) -> DbResult<SchemaModel> {
        let file: Option<String> = sqlx::query_scalar(queries::sqlite::MAIN_FILE)
            .fetch_optional(&mut *conn)
            .await?;
        let database = file
            .as_deref()
            .and_then(|f| Path::new(f).file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| SCHEMA.to_string());

        let columns = sqlx::query(queries::sqlite::LIST_COLUMNS)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(|row| {
                let not_null: i64 = row.try_get("not_null").unwrap_or(0);
                let pk: i64 = row.try_get("pk").unwrap_or(0);
                ColumnRow {
                    schema: SCHEMA.to_string(),
                    table: row.get("table_name"),
                    column: row.get("column_name"),
                    data_type: row.try_get("data_type").unwrap_or_default(),
                    nullable: not_null == 0,
                    is_primary_key: pk > 0,
                }
            })
            .collect();

        let foreign_keys = sqlx::query(queries::sqlite::LIST_FOREIGN_KEYS)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(|row| ForeignKeyRow {
                from_schema: SCHEMA.to_string(),
                from_table: row.get("from_table"),
                from_column: row.get("from_column"),
                to_schema: SCHEMA.to_string(),
                to_table: row.get("to_table"),
                to_column: row.try_get::<Option<String>, _>("to_column").ok().flatten(),
            })
            .collect();

        Ok(assemble_schema(database, columns, foreign_keys))
    }

    /// Main and attached databases, sized by `page_count * page_size`.
    pub async fn list_databases(conn: &mut SqliteConnection) -> DbResult<Vec<DatabaseInfo>> {
        let rows = sqlx::query(queries::sqlite::LIST_DATABASES)
            .fetch_all(&mut *conn)
            .await?;
        let names: Vec<String> = rows.iter().map(|row| row.get("name")).collect();

        let mut databases = Vec::with_capacity(names.len());
        for name in names {
            let quoted = name.replace('"', "\"\"");
            let page_count: Option<i64> =
                sqlx::query_scalar(&format!("PRAGMA \"{}\".page_count", quoted))
                    .fetch_optional(&mut *conn)
                    .await?;
            let page_size: Option<i64> =
                sqlx::query_scalar(&format!("PRAGMA \"{}\".page_size", quoted))
                    .fetch_optional(&mut *conn)
                    .await?;
            let size = match (page_count, page_size) {
                (Some(count), Some(size)) => Some((count * size) as u64),
                _ => None,
            };
            databases.push(DatabaseInfo::new(name, size));
        }
        Ok(databases)
    }

    pub async fn probe_server(
        conn: &mut SqliteConnection,
        fallback_name: &str,
    ) -> DbResult<ServerInfo> {
        let version: String = sqlx::query_scalar(queries::sqlite::SERVER_VERSION)
            .fetch_one(&mut *conn)
            .await?;
        Ok(ServerInfo::new(fallback_name, "SQLite").with_version(version))
    }
}

mod sqlserver {
    use super::*;
    use crate::db::connection::SqlServerClient;

    fn text(row: &tiberius::Row, idx: usize) -> Option<String> {
        row.try_get::<&str, usize>(idx)
            .ok()
            .flatten()
            .map(str::to_string)
    }

    fn flag(row: &tiberius::Row, idx: usize) -> bool {
        row.try_get::<bool, usize>(idx).ok().flatten().unwrap_or(false)
    }

    async fn fetch(client: &mut SqlServerClient, sql: &str) -> DbResult<Vec<tiberius::Row>> {
        Ok(client.simple_query(sql).await?.into_first_result().await?)
    }

    pub async fn introspect(client: &mut SqlServerClient) -> DbResult<SchemaModel> {
        let database = fetch(client, queries::sqlserver::CURRENT_DATABASE)
            .await?
            .first()
            .and_then(|row| text(row, 0))
            .unwrap_or_default();

        let columns = fetch(client, queries::sqlserver::LIST_COLUMNS)
            .await?
            .iter()
            .map(|row| ColumnRow {
                schema: text(row, 0).unwrap_or_default(),
                table: text(row, 1).unwrap_or_default(),
                column: text(row, 2).unwrap_or_default(),
                data_type: text(row, 3).unwrap_or_default(),
                nullable: flag(row, 4),
                is_primary_key: flag(row, 5),
            })
            .collect();

        let foreign_keys = fetch(client, queries::sqlserver::LIST_FOREIGN_KEYS)
            .await?
            .iter()
            .map(|row| ForeignKeyRow {
                from_schema: text(row, 0).unwrap_or_default(),
                from_table: text(row, 1).unwrap_or_default(),
                from_column: text(row, 2).unwrap_or_default(),
                to_schema: text(row, 3).unwrap_or_default(),
                to_table: text(row, 4).unwrap_or_default(),
                to_column: text(row, 5),
            })
            .collect();

        Ok(assemble_schema(database, columns, foreign_keys))
    }

    pub async fn list_databases(client: &mut SqlServerClient) -> DbResult<Vec<DatabaseInfo>> {
        Ok(fetch(client, queries::sqlserver::LIST_DATABASES)
            .await?
            .iter()
            .filter_map(|row| {
                let name = text(row, 0)?;
                let size = row.try_get::<i64, usize>(1).ok().flatten();
                Some(DatabaseInfo::new(name, size.map(|s| s as u64)))
            })
            .collect())
    }

    pub async fn probe_server(
        client: &mut SqlServerClient,
        fallback_name: &str,
    ) -> DbResult<ServerInfo> {
        let rows = fetch(client, queries::sqlserver::SERVER_VERSION).await?;
        let row = rows.first();
        let name = row
            .and_then(|r| text(r, 0))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| fallback_name.to_string());
        let edition = row
            .and_then(|r| text(r, 1))
            .unwrap_or_else(|| "SQL Server".to_string());
        let mut server = ServerInfo::new(name, edition);
        if let Some(version) = row.and_then(|r| text(r, 2)) {
            server = server.with_version(version);
        }
        Ok(server)
    }
}

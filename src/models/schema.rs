//! Schema-related data models.
//!
//! This module defines the schema snapshot produced by introspection and
//! persisted in the schema cache.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Snapshot of a database's tables and the foreign-key edges between them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaModel {
    pub database: String,
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub relations: Vec<RelationInfo>,
}

impl SchemaModel {
    /// Create an empty schema for the given database.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            tables: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Whether introspection found no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Find a table by schema namespace and name (case-insensitive).
    pub fn table(&self, schema: &str, name: &str) -> Option<&TableInfo> {
        self.tables
            .iter()
            .find(|t| t.schema.eq_ignore_ascii_case(schema) && t.name.eq_ignore_ascii_case(name))
    }

    /// Render the schema as compact text for prompt construction.
    ///
    /// One line per table, columns in ordinal order, followed by the relation list:
    ///
    /// ```text
    /// Database: shop
    /// main.orders(id integer PK, customer_id integer NULL FK->main.customers.id)
    /// Relations:
    /// main.orders.customer_id -> main.customers.id
    /// ```
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Database: {}", self.database);
        for table in &self.tables {
            let columns = table
                .columns
                .iter()
                .map(|c| {
                    let mut col = format!("{} {}", c.name, c.data_type);
                    if c.is_primary_key {
                        col.push_str(" PK");
                    }
                    if c.nullable {
                        col.push_str(" NULL");
                    }
                    if let Some(fk) = &c.foreign_key {
                        let _ = write!(col, " FK->{}.{}.{}", fk.schema, fk.table, fk.column);
                    }
                    col
                })
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "{}.{}({})", table.schema, table.name, columns);
        }
        if !self.relations.is_empty() {
            out.push_str("Relations:\n");
            for rel in &self.relations {
                let _ = writeln!(
                    out,
                    "{}.{}.{} -> {}.{}.{}",
                    rel.from_schema,
                    rel.from_table,
                    rel.from_column,
                    rel.to_schema,
                    rel.to_table,
                    rel.to_column
                );
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Schema namespace (`dbo`, `public`, the MySQL database name, `main` for SQLite)
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    /// Create a new table info.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Find a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Names of the primary-key columns, in ordinal order.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Database-specific type (e.g., "int", "nvarchar", "TEXT")
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKeyTarget>,
}

impl ColumnInfo {
    /// Create a new column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            is_primary_key: false,
            foreign_key: None,
        }
    }

    /// Mark this column as part of the primary key. Primary-key columns are never nullable.
    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        if is_pk {
            self.nullable = false;
        }
        self
    }

    /// Set the foreign-key target.
    pub fn with_foreign_key(mut self, target: ForeignKeyTarget) -> Self {
        self.foreign_key = Some(target);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyTarget {
    pub schema: String,
    pub table: String,
    pub column: String,
}

/// A foreign-key edge between two tables of the same schema snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationInfo {
    pub from_schema: String,
    pub from_table: String,
    pub from_column: String,
    pub to_schema: String,
    pub to_table: String,
    pub to_column: String,
}

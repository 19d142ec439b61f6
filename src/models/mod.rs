//! Data models for the database providers.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod discovery;
pub mod execution;
pub mod schema;

// Re-export commonly used types
pub use connection::{BackendKind, ProviderConnectionConfig, UnknownBackendKind};
pub use discovery::{DatabaseInfo, ServerInfo, merge_discovered_servers};
pub use execution::{BoundParameter, ExecuteRequest, ExecutionMode, ExecutionResult, QueryParam};
pub use schema::{ColumnInfo, ForeignKeyTarget, RelationInfo, SchemaModel, TableInfo};

//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - The provider contract and its per-backend implementations
//! - Per-call driver connections
//! - Statement classification and the read-only gate
//! - Query execution
//! - Schema introspection
//! - Type mappings
//! - SQL Server Browser discovery

pub mod browser;
pub mod connection;
pub mod executor;
pub mod guard;
pub mod provider;
pub mod schema;
pub mod sqlserver;
pub mod sqlx_provider;
pub mod types;

pub use connection::{ProviderConnection, SqlServerClient};
pub use executor::{ExecutionOutcome, QueryExecutor};
pub use guard::{ExecutionPolicy, GateDecision, StatementKind};
pub use provider::{DatabaseProvider, ProviderCore, SchemaCache, cancellable};
pub use schema::SchemaInspector;
pub use sqlserver::SqlServerProvider;
pub use sqlx_provider::SqlxProvider;

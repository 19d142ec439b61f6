//! Database provider library.
//!
//! Uniform discovery, schema introspection and gated SQL execution over
//! SQL Server, PostgreSQL, MySQL and SQLite, with results cached in JSON files.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod factory;
pub mod models;
pub mod store;

pub use config::{Config, ProviderSettings};
pub use db::DatabaseProvider;
pub use error::{DbError, DbResult};
pub use factory::ProviderFactory;

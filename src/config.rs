//! Configuration handling for the database providers.
//!
//! [`ProviderSettings`] carries the knobs every provider reads (timeouts, row
//! limit, cache root, read-only allow-list). [`Config`] is the command-line
//! surface of the `db-provider` binary, with environment variable fallbacks.

use crate::cache::paths;
use crate::db::browser::DEFAULT_BROWSER_ADDRESS;
use crate::db::guard::{ExecutionPolicy, StatementKind};
use crate::models::{BackendKind, ExecutionMode, ProviderConnectionConfig, QueryParam};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_BROWSER_TIMEOUT_MS: u64 = 1500;

// Row limits
pub const DEFAULT_ROW_LIMIT: u32 = 1000;
pub const MAX_ROW_LIMIT: u32 = 10000;

/// Settings shared by every provider built from one factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Cache root override (default: platform local data directory)
    pub cache_root: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
    /// Maximum rows returned by one execution (1..=MAX_ROW_LIMIT)
    pub row_limit: u32,
    /// SQL Server Browser endpoint probed during server discovery
    pub browser_address: String,
    pub browser_timeout_ms: u64,
    /// Statement kinds permitted in read-only mode
    pub read_only_allowed: BTreeSet<StatementKind>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            cache_root: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            row_limit: DEFAULT_ROW_LIMIT,
            browser_address: DEFAULT_BROWSER_ADDRESS.to_string(),
            browser_timeout_ms: DEFAULT_BROWSER_TIMEOUT_MS,
            read_only_allowed: ExecutionPolicy::default().read_only_allowed,
        }
    }
}

impl ProviderSettings {
    /// Validate settings and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be greater than 0".to_string());
        }
        if self.query_timeout_secs == 0 {
            return Err("query_timeout_secs must be greater than 0".to_string());
        }
        if self.row_limit == 0 || self.row_limit > MAX_ROW_LIMIT {
            return Err(format!(
                "row_limit must be between 1 and {} (got {})",
                MAX_ROW_LIMIT, self.row_limit
            ));
        }
        if self.browser_address.trim().is_empty() {
            return Err("browser_address must not be empty".to_string());
        }
        if let Some(kind) = self
            .read_only_allowed
            .iter()
            .find(|k| !k.is_read_only_eligible())
        {
            return Err(format!(
                "read_only_allowed may only include query, show, explain and transaction \
                 statements (got {:?})",
                kind
            ));
        }
        Ok(())
    }

    /// Cache directory for `kind`, under the override root if one is set.
    pub fn cache_directory(&self, kind: BackendKind) -> PathBuf {
        match &self.cache_root {
            Some(root) => paths::cache_directory_in(root, kind),
            None => paths::default_cache_directory(kind),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn browser_timeout(&self) -> Duration {
        Duration::from_millis(self.browser_timeout_ms)
    }

    pub fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy::new(self.read_only_allowed.iter().copied())
    }
}

/// Command-line configuration for the `db-provider` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-provider",
    about = "Discover, introspect and query SQL Server, PostgreSQL, MySQL and SQLite databases",
    version,
    author
)]
pub struct Config {
    /// Backend kind (sqlserver, postgresql, mysql, sqlite). Inferred from the
    /// connection string when omitted.
    #[arg(short, long, env = "DBP_KIND")]
    pub kind: Option<String>,

    /// Connection string: a URL for sqlx backends, an ADO string for SQL Server
    #[arg(short, long, value_name = "CONNECTION", env = "DBP_CONNECTION")]
    pub connection: Option<String>,

    /// Username overriding the one in the connection string
    #[arg(long, env = "DBP_USERNAME")]
    pub username: Option<String>,

    /// Password overriding the one in the connection string
    #[arg(long, env = "DBP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Stored profile to connect with, instead of --connection
    #[arg(long, value_name = "ID", env = "DBP_PROFILE", conflicts_with = "connection")]
    pub profile: Option<String>,

    /// JSON file holding stored profiles. Secrets come from DBP_SECRET_<REF>.
    #[arg(long, value_name = "FILE", env = "DBP_PROFILES_FILE")]
    pub profiles_file: Option<PathBuf>,

    /// Cache root directory
    #[arg(long, value_name = "DIR", env = "DBP_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "DBP_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "DBP_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Maximum rows returned by `execute`
    #[arg(long, default_value_t = DEFAULT_ROW_LIMIT, env = "DBP_ROW_LIMIT")]
    pub row_limit: u32,

    /// SQL Server Browser address for server discovery
    #[arg(long, default_value = DEFAULT_BROWSER_ADDRESS, env = "DBP_BROWSER_ADDRESS")]
    pub browser_address: String,

    /// How long to wait for SQL Server Browser answers, in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_BROWSER_TIMEOUT_MS,
        env = "DBP_BROWSER_TIMEOUT_MS"
    )]
    pub browser_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "DBP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DBP_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Test connectivity
    Check,
    /// List known servers
    Servers {
        /// Ignore the cache and rediscover
        #[arg(long)]
        refresh: bool,
    },
    /// List databases on the connected server, or on another server
    Databases {
        #[arg(long)]
        server: Option<String>,
    },
    /// Show the schema of the connected database
    Schema {
        /// Ignore the cache and introspect again
        #[arg(long)]
        refresh: bool,
        /// Print the compact text rendering instead of JSON
        #[arg(long)]
        text: bool,
    },
    /// Execute SQL (read-only unless --write is given)
    Execute {
        sql: String,
        /// Allow data-modifying statements
        #[arg(long)]
        write: bool,
        /// Positional parameter as name=value. Values are parsed as JSON (bytes as
        /// `{"base64":"..."}`), falling back to text.
        #[arg(short, long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
        params: Vec<(String, QueryParam)>,
        /// Natural-language request this SQL answers, recorded in logs
        #[arg(long)]
        user_query: Option<String>,
    },
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn settings(&self) -> ProviderSettings {
        ProviderSettings {
            cache_root: self.cache_dir.clone(),
            connect_timeout_secs: self.connect_timeout,
            query_timeout_secs: self.query_timeout,
            row_limit: self.row_limit,
            browser_address: self.browser_address.clone(),
            browser_timeout_ms: self.browser_timeout_ms,
            ..ProviderSettings::default()
        }
    }

    /// The connection described by the flags, if a connection string was given.
    pub fn connection_config(&self) -> Option<ProviderConnectionConfig> {
        let connection = self.connection.as_deref()?;
        let mut config = ProviderConnectionConfig::new(connection);
        config.username = self.username.clone();
        config.password = self.password.clone();
        Some(config)
    }

    /// Backend kind tag: explicit `--kind`, or inferred from the connection string.
    pub fn kind_tag(&self) -> Result<String, String> {
        if let Some(kind) = &self.kind {
            return Ok(kind.clone());
        }
        self.connection
            .as_deref()
            .and_then(BackendKind::from_connection_string)
            .map(|k| k.dialect().to_string())
            .ok_or_else(|| "Cannot infer the backend kind; pass --kind".to_string())
    }

    /// Profiles file: the explicit flag, or `profiles.json` under the cache root.
    pub fn profiles_path(&self) -> PathBuf {
        match &self.profiles_file {
            Some(path) => path.clone(),
            None => self
                .cache_dir
                .clone()
                .unwrap_or_else(paths::default_cache_root)
                .join("profiles.json"),
        }
    }
}

impl Command {
    pub fn execution_mode(write: bool) -> ExecutionMode {
        if write {
            ExecutionMode::Write
        } else {
            ExecutionMode::ReadOnly
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, QueryParam), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Invalid parameter '{}': expected NAME=VALUE", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("Invalid parameter '{}': empty name", raw));
    }
    let value = serde_json::from_str::<QueryParam>(value)
        .unwrap_or_else(|_| QueryParam::String(value.to_string()));
    Ok((name.to_string(), value))
}

//! Provider construction.
//!
//! The factory maps a backend kind tag onto a registered constructor. A tag
//! that does not parse, or names a kind with no registered constructor, is a
//! configuration bug: it is logged once and reported as
//! [`DbError::UnsupportedBackend`].

use crate::cache::paths;
use crate::config::ProviderSettings;
use crate::db::provider::{DatabaseProvider, ProviderCore};
use crate::db::sqlserver::SqlServerProvider;
use crate::db::sqlx_provider::SqlxProvider;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, ProviderConnectionConfig};
use crate::store::{InMemoryProfileStore, InMemorySecretStore, ProfileStore, SecretStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Builds a provider around a prepared core.
pub type ProviderConstructor = fn(ProviderCore) -> Box<dyn DatabaseProvider>;

const CREATE_STANDALONE: &str = "create_standalone";
const CREATE_WITH_PROFILE: &str = "create_with_profile";

pub struct ProviderFactory {
    settings: Arc<ProviderSettings>,
    profiles: Arc<dyn ProfileStore>,
    secrets: Arc<dyn SecretStore>,
    registry: HashMap<BackendKind, ProviderConstructor>,
}

impl ProviderFactory {
    /// Factory with every built-in backend registered.
    ///
    /// Fails with [`DbError::InvalidInput`] when `settings` do not validate.
    pub fn new(
        settings: ProviderSettings,
        profiles: Arc<dyn ProfileStore>,
        secrets: Arc<dyn SecretStore>,
    ) -> DbResult<Self> {
        let mut factory = Self::empty(settings, profiles, secrets)?;
        factory.register(BackendKind::SqlServer, sqlserver_provider);
        factory.register(BackendKind::PostgreSql, sqlx_provider);
        factory.register(BackendKind::MySql, sqlx_provider);
        factory.register(BackendKind::Sqlite, sqlx_provider);
        Ok(factory)
    }

    /// Factory with no registered backends.
    pub fn empty(
        settings: ProviderSettings,
        profiles: Arc<dyn ProfileStore>,
        secrets: Arc<dyn SecretStore>,
    ) -> DbResult<Self> {
        settings.validate().map_err(|message| {
            error!(error = %message, "Rejected provider settings");
            DbError::invalid_input(message)
        })?;
        Ok(Self {
            settings: Arc::new(settings),
            profiles,
            secrets,
            registry: HashMap::new(),
        })
    }

    /// Factory for standalone use only: profile lookups always miss.
    pub fn standalone(settings: ProviderSettings) -> DbResult<Self> {
        Self::new(
            settings,
            Arc::new(InMemoryProfileStore::new()),
            Arc::new(InMemorySecretStore::new()),
        )
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register(
        &mut self,
        kind: BackendKind,
        constructor: ProviderConstructor,
    ) -> Option<ProviderConstructor> {
        self.registry.insert(kind, constructor)
    }

    pub fn unregister(&mut self, kind: BackendKind) -> Option<ProviderConstructor> {
        self.registry.remove(&kind)
    }

    pub fn supported_kinds(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .iter()
            .copied()
            .filter(|k| self.registry.contains_key(k))
            .collect()
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Provider with no persisted identity, using the backend-wide cache files.
    pub fn create_standalone(&self, kind: &str) -> DbResult<Box<dyn DatabaseProvider>> {
        let (kind, constructor) = self.resolve(kind, CREATE_STANDALONE)?;
        info!(kind = %kind, "Created standalone provider");
        Ok(constructor(ProviderCore::new(kind, self.settings.clone())))
    }

    /// Provider bound to a stored profile.
    ///
    /// The profile's secret is resolved into the bound connection. Both cache
    /// files are scoped to the profile: servers live in the profile's cache
    /// directory, schemas in its `cache_file` override or that same directory.
    pub async fn create_with_profile(
        &self,
        profile_id: &str,
        kind: &str,
        cancel: &CancellationToken,
    ) -> DbResult<Box<dyn DatabaseProvider>> {
        let (kind, constructor) = self.resolve(kind, CREATE_WITH_PROFILE)?;

        let profile = self
            .profiles
            .get_profile(profile_id, cancel)
            .await?
            .ok_or_else(|| DbError::profile_not_found(profile_id))?;
        let secret = self
            .secrets
            .get_secret(&profile.secret_ref, cancel)
            .await?
            .ok_or_else(|| DbError::secret_not_found(profile_id, &profile.secret_ref))?;
        let connection = ProviderConnectionConfig::from_secret(&secret);

        let profile_dir =
            paths::profile_cache_directory(&self.settings.cache_directory(kind), &profile.id);
        let server_cache = paths::server_cache_file(&profile_dir, kind.dialect());
        let schema_cache = match &profile.cache_file {
            Some(path) => path.clone(),
            None => paths::schema_cache_file(&profile_dir, kind.dialect()),
        };

        info!(
            kind = %kind,
            profile = %profile.id,
            connection = %connection.masked_connection_string(),
            "Created profile-bound provider"
        );
        let core = ProviderCore::new(kind, self.settings.clone())
            .with_connection(connection)
            .with_server_cache(server_cache)
            .with_schema_cache(schema_cache);
        Ok(constructor(core))
    }

    fn resolve(
        &self,
        kind: &str,
        operation: &'static str,
    ) -> DbResult<(BackendKind, ProviderConstructor)> {
        let constructor = kind
            .parse::<BackendKind>()
            .ok()
            .and_then(|k| self.registry.get(&k).map(|c| (k, *c)));
        match constructor {
            Some(found) => Ok(found),
            None => {
                error!(kind, operation, "Unsupported backend kind");
                Err(DbError::unsupported_backend(kind, operation))
            }
        }
    }
}

fn sqlserver_provider(core: ProviderCore) -> Box<dyn DatabaseProvider> {
    Box::new(SqlServerProvider::from_core(core))
}

fn sqlx_provider(core: ProviderCore) -> Box<dyn DatabaseProvider> {
    Box::new(SqlxProvider::from_core(core))
}

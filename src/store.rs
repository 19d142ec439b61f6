//! Profile and secret collaborators consumed by the provider factory.
//!
//! The traits are the boundary; the implementations here cover tests, the CLI
//! and simple deployments. A profiles file is a JSON array of
//! [`ProfileRecord`] persisted through the file cache.

use crate::cache::file_cache;
use crate::error::DbResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Stored connection profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    pub name: String,
    /// Key resolved through the [`SecretStore`] into connection settings
    pub secret_ref: String,
    /// Schema cache file override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<PathBuf>,
}

impl ProfileRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        secret_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            secret_ref: secret_ref.into(),
            cache_file: None,
        }
    }

    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(
        &self,
        profile_id: &str,
        cancel: &CancellationToken,
    ) -> DbResult<Option<ProfileRecord>>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, key: &str, cancel: &CancellationToken) -> DbResult<Option<String>>;
}

#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, ProfileRecord>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, profile: ProfileRecord) {
        self.profiles
            .write()
            .await
            .insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_profile(
        &self,
        profile_id: &str,
        _cancel: &CancellationToken,
    ) -> DbResult<Option<ProfileRecord>> {
        Ok(self.profiles.read().await.get(profile_id).cloned())
    }
}

/// Profiles kept in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonProfileStore {
    path: PathBuf,
}

impl JsonProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Insert or replace a profile by id.
    pub async fn save_profile(
        &self,
        profile: ProfileRecord,
        cancel: &CancellationToken,
    ) -> DbResult<()> {
        file_cache::save_or_update(
            &self.path,
            move |mut profiles: Vec<ProfileRecord>| {
                profiles.retain(|p| p.id != profile.id);
                profiles.push(profile);
                profiles
            },
            cancel,
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl ProfileStore for JsonProfileStore {
    async fn get_profile(
        &self,
        profile_id: &str,
        cancel: &CancellationToken,
    ) -> DbResult<Option<ProfileRecord>> {
        let profiles: Vec<ProfileRecord> = file_cache::load(&self.path, cancel).await?;
        Ok(profiles.into_iter().find(|p| p.id == profile_id))
    }
}

#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.secrets.write().await.insert(key.into(), value.into());
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret(&self, key: &str, _cancel: &CancellationToken) -> DbResult<Option<String>> {
        Ok(self.secrets.read().await.get(key).cloned())
    }
}

/// Secrets read from environment variables named `<prefix><KEY>`.
#[derive(Debug, Clone)]
pub struct EnvSecretStore {
    prefix: String,
}

impl Default for EnvSecretStore {
    fn default() -> Self {
        Self::with_prefix("DBP_SECRET_")
    }
}

impl EnvSecretStore {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Variable holding `key`: uppercased, non-alphanumerics replaced by `_`.
    pub fn variable_name(&self, key: &str) -> String {
        let suffix: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, suffix)
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, key: &str, _cancel: &CancellationToken) -> DbResult<Option<String>> {
        Ok(std::env::var(self.variable_name(key))
            .ok()
            .filter(|v| !v.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_env_variable_name() {
        let store = EnvSecretStore::default();
        assert_eq!(store.variable_name("prod-db.main"), "DBP_SECRET_PROD_DB_MAIN");
        assert_eq!(
            EnvSecretStore::with_prefix("X_").variable_name("a"),
            "X_A"
        );
    }

    #[tokio::test]
    async fn test_in_memory_stores() {
        let cancel = CancellationToken::new();
        let profiles = InMemoryProfileStore::new();
        profiles
            .insert(ProfileRecord::new("p1", "Prod", "prod-secret"))
            .await;
        assert_eq!(
            profiles.get_profile("p1", &cancel).await.unwrap().unwrap().name,
            "Prod"
        );
        assert!(profiles.get_profile("p2", &cancel).await.unwrap().is_none());

        let secrets = InMemorySecretStore::new();
        secrets.insert("k", "sqlite::memory:").await;
        assert_eq!(
            secrets.get_secret("k", &cancel).await.unwrap().as_deref(),
            Some("sqlite::memory:")
        );
    }

    #[tokio::test]
    async fn test_json_profile_store_upserts() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let store = JsonProfileStore::new(dir.path().join("profiles.json"));

        assert!(store.get_profile("p1", &cancel).await.unwrap().is_none());

        store
            .save_profile(ProfileRecord::new("p1", "First", "s1"), &cancel)
            .await
            .unwrap();
        store
            .save_profile(
                ProfileRecord::new("p1", "Renamed", "s1").with_cache_file("/tmp/p1.json"),
                &cancel,
            )
            .await
            .unwrap();

        let profile = store.get_profile("p1", &cancel).await.unwrap().unwrap();
        assert_eq!(profile.name, "Renamed");
        assert_eq!(profile.cache_file, Some(PathBuf::from("/tmp/p1.json")));
    }
}

//! Deterministic cache file locations.

use crate::models::BackendKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Application directory name under the platform data root.
pub const APP_DIR: &str = "db-provider";

/// Root of all cache directories: `<local data dir>/db-provider/cache`.
///
/// Falls back to the system temp directory when the platform reports no data directory.
pub fn default_cache_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("cache")
}

/// Per-backend cache directory under the default root.
pub fn default_cache_directory(kind: BackendKind) -> PathBuf {
    cache_directory_in(&default_cache_root(), kind)
}

/// Per-backend cache directory under an explicit root.
pub fn cache_directory_in(root: &Path, kind: BackendKind) -> PathBuf {
    root.join(kind.dialect())
}

/// `<dir>/<dialect>.json`
pub fn server_cache_file(dir: &Path, dialect: &str) -> PathBuf {
    dir.join(format!("{}.json", dialect))
}

/// `<dir>/<dialect>_schemas.json`
pub fn schema_cache_file(dir: &Path, dialect: &str) -> PathBuf {
    dir.join(format!("{}_schemas.json", dialect))
}

/// `<dir>/profiles/<safe id>-<id hash>`.
///
/// The id is reduced to a safe single path component; the suffix is derived
/// from the raw id so ids that sanitize alike still get separate directories.
pub fn profile_cache_directory(dir: &Path, profile_id: &str) -> PathBuf {
    dir.join("profiles").join(format!(
        "{}-{}",
        sanitize_component(profile_id),
        id_hash(profile_id)
    ))
}

/// First 8 hex digits of the name-based (v5) UUID of `raw`.
fn id_hash(raw: &str) -> String {
    let mut hex = Uuid::new_v5(&Uuid::NAMESPACE_OID, raw.as_bytes())
        .simple()
        .to_string();
    hex.truncate(8);
    hex
}

fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return "_".repeat(cleaned.len().max(1));
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_files_are_dialect_qualified() {
        let dir = cache_directory_in(Path::new("/data"), BackendKind::SqlServer);
        assert_eq!(dir, PathBuf::from("/data/sqlserver"));
        assert_eq!(
            server_cache_file(&dir, "sqlserver"),
            PathBuf::from("/data/sqlserver/sqlserver.json")
        );
        assert_eq!(
            schema_cache_file(&dir, "sqlserver"),
            PathBuf::from("/data/sqlserver/sqlserver_schemas.json")
        );
    }

    #[test]
    fn test_default_directory_is_deterministic() {
        assert_eq!(
            default_cache_directory(BackendKind::PostgreSql),
            default_cache_directory(BackendKind::PostgreSql)
        );
        assert!(default_cache_directory(BackendKind::MySql).ends_with("db-provider/cache/mysql"));
    }

    #[test]
    fn test_profile_directory_is_sanitized() {
        let dir = Path::new("/c");
        let name = |id: &str| {
            profile_cache_directory(dir, id)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        };

        assert!(name("team/prod db").starts_with("team_prod_db-"));
        assert!(name("..").starts_with("__-"));
        assert!(name("").starts_with("_-"));
        assert_eq!(name("team/prod db").len(), "team_prod_db-".len() + 8);
        assert_eq!(
            profile_cache_directory(dir, "x").parent(),
            Some(Path::new("/c/profiles"))
        );
    }

    #[test]
    fn test_profile_directory_is_stable_and_distinct() {
        let dir = Path::new("/c");
        assert_eq!(
            profile_cache_directory(dir, "team/prod"),
            profile_cache_directory(dir, "team/prod")
        );
        assert_ne!(
            profile_cache_directory(dir, "team/prod"),
            profile_cache_directory(dir, "team_prod")
        );
        assert_ne!(
            profile_cache_directory(dir, "a b"),
            profile_cache_directory(dir, "a:b")
        );
    }
}

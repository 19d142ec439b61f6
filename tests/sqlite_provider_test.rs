//! End-to-end provider behaviour against temporary SQLite databases.

use db_provider::cache::{
    profile_cache_directory, save_and_replace, schema_cache_file, server_cache_file,
};
use db_provider::db::{DatabaseProvider, SqlxProvider, StatementKind};
use db_provider::error::DbError;
use db_provider::models::{
    BackendKind, ExecuteRequest, ExecutionMode, ProviderConnectionConfig, QueryParam, ServerInfo,
};
use db_provider::store::{InMemoryProfileStore, InMemorySecretStore, ProfileRecord};
use db_provider::{ProviderFactory, ProviderSettings};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn settings(dir: &TempDir) -> ProviderSettings {
    ProviderSettings {
        cache_root: Some(dir.path().join("cache")),
        ..ProviderSettings::default()
    }
}

fn sqlite_config(dir: &TempDir, file: &str) -> ProviderConnectionConfig {
    ProviderConnectionConfig::new(format!("sqlite:{}", dir.path().join(file).display()))
}

async fn seed(provider: &dyn DatabaseProvider, config: &ProviderConnectionConfig) {
    let cancel = CancellationToken::new();
    for sql in [
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers(id), total REAL)",
        "INSERT INTO customers (id, name) VALUES (1, 'Ada'), (2, 'Grace')",
        "INSERT INTO orders (id, customer_id, total) VALUES (10, 1, 9.5), (11, 2, 20.0)",
    ] {
        provider
            .execute(
                config,
                &ExecuteRequest::new(sql).with_mode(ExecutionMode::Write),
                &cancel,
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_read_only_rejection_leaves_data_intact() {
    let dir = TempDir::new().unwrap();
    let provider = SqlxProvider::sqlite(Arc::new(settings(&dir)));
    let config = sqlite_config(&dir, "shop.db");
    seed(&provider, &config).await;
    let cancel = CancellationToken::new();

    for sql in [
        "DELETE FROM orders",
        "DROP TABLE customers",
        "SELECT 1; DELETE FROM orders",
    ] {
        let request = ExecuteRequest::new(sql).with_user_query("clean up orders");
        let err = provider
            .execute(&config, &request, &cancel)
            .await
            .unwrap_err();
        let result = err.execution_result().expect("partial result");
        assert!(!result.success(), "{} should be rejected", sql);
        assert!(result.rows.is_empty());
    }

    let count = provider
        .execute(
            &config,
            &ExecuteRequest::new("SELECT COUNT(*) AS n FROM orders"),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(count.columns, vec!["n"]);
    assert_eq!(count.rows, vec![vec![serde_json::json!(2)]]);
}

#[tokio::test]
async fn test_widened_settings_cannot_open_read_only_writes() {
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&dir, "shop.db");
    seed(&SqlxProvider::sqlite(Arc::new(settings(&dir))), &config).await;

    // Settings that skipped validation still cannot let state changes through.
    let mut widened = settings(&dir);
    widened.read_only_allowed.insert(StatementKind::DmlWrite);
    widened.read_only_allowed.insert(StatementKind::Ddl);
    let provider = SqlxProvider::sqlite(Arc::new(widened));
    let cancel = CancellationToken::new();

    for sql in ["DELETE FROM orders", "DROP TABLE orders"] {
        let err = provider
            .execute(&config, &ExecuteRequest::new(sql), &cancel)
            .await
            .unwrap_err();
        let result = err.execution_result().expect("partial result");
        assert!(!result.success(), "{} should be rejected", sql);
    }

    let count = provider
        .execute(&config, &ExecuteRequest::new("SELECT COUNT(*) AS n FROM orders"), &cancel)
        .await
        .unwrap();
    assert_eq!(count.rows, vec![vec![serde_json::json!(2)]]);
}

#[tokio::test]
async fn test_empty_select_reports_columns() {
    let dir = TempDir::new().unwrap();
    let provider = SqlxProvider::sqlite(Arc::new(settings(&dir)));
    let config = sqlite_config(&dir, "shop.db");
    seed(&provider, &config).await;

    let result = provider
        .execute(
            &config,
            &ExecuteRequest::new("SELECT id, name FROM customers WHERE id > 100"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.columns, vec!["id", "name"]);
    assert!(result.rows.is_empty());
    assert!(result.success());
}

#[tokio::test]
async fn test_parameters_and_write_results() {
    let dir = TempDir::new().unwrap();
    let provider = SqlxProvider::sqlite(Arc::new(settings(&dir)));
    let config = sqlite_config(&dir, "shop.db");
    seed(&provider, &config).await;
    let cancel = CancellationToken::new();

    let update = provider
        .execute(
            &config,
            &ExecuteRequest::new("UPDATE orders SET total = total + ? WHERE customer_id = ?")
                .with_mode(ExecutionMode::Write)
                .with_param("delta", QueryParam::Float(0.5))
                .with_param("customer", QueryParam::Int(1)),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(update.rows_affected, Some(1));
    assert_eq!(update.parameters.len(), 2);

    let select = provider
        .execute(
            &config,
            &ExecuteRequest::new("SELECT name FROM customers WHERE id = ?")
                .with_param("id", QueryParam::Int(2)),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(select.rows, vec![vec![serde_json::json!("Grace")]]);
    assert!(!select.truncated);
}

#[tokio::test]
async fn test_driver_error_carries_partial_result() {
    let dir = TempDir::new().unwrap();
    let provider = SqlxProvider::sqlite(Arc::new(settings(&dir)));
    let config = sqlite_config(&dir, "shop.db");
    seed(&provider, &config).await;

    let err = provider
        .execute(
            &config,
            &ExecuteRequest::new("SELECT missing_column FROM customers"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    match err {
        DbError::Execution { message, result } => {
            assert!(message.contains("missing_column"));
            assert_eq!(result.error_message.as_deref(), Some(message.as_str()));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_execute_is_not_an_execution_error() {
    let dir = TempDir::new().unwrap();
    let provider = SqlxProvider::sqlite(Arc::new(settings(&dir)));
    let config = sqlite_config(&dir, "shop.db");
    seed(&provider, &config).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = provider
        .execute(&config, &ExecuteRequest::new("SELECT 1"), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_get_servers_uses_warm_cache_until_forced() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let cache_file = server_cache_file(
        &settings.cache_directory(BackendKind::Sqlite),
        BackendKind::Sqlite.dialect(),
    );
    let cancel = CancellationToken::new();
    save_and_replace(&cache_file, &vec![ServerInfo::new("remembered", "SQLite")], &cancel)
        .await
        .unwrap();

    let config = sqlite_config(&dir, "shop.db");
    let provider = SqlxProvider::sqlite(Arc::new(settings)).with_connection(config.clone());
    seed(&provider, &config).await;

    let warm = provider.get_servers(false, &cancel).await.unwrap();
    assert_eq!(warm.len(), 1);
    assert_eq!(warm[0].name, "remembered");

    let forced = provider.get_servers(true, &cancel).await.unwrap();
    assert_eq!(forced.len(), 1);
    assert_eq!(forced[0].name, "local");
    assert_eq!(forced[0].weight, 1);

    // The refreshed list replaced the stale entry on disk
    let again = provider.get_servers(false, &cancel).await.unwrap();
    assert_eq!(again, forced);
}

#[tokio::test]
async fn test_databases_and_schema() {
    let dir = TempDir::new().unwrap();
    let provider = SqlxProvider::sqlite(Arc::new(settings(&dir)));
    let config = sqlite_config(&dir, "shop.db");
    seed(&provider, &config).await;
    let cancel = CancellationToken::new();

    let databases = provider.get_databases(&config, &cancel).await.unwrap();
    assert_eq!(databases.len(), 1);
    assert_eq!(databases[0].name, "main");
    assert!(databases[0].size_bytes.is_some_and(|size| size > 0));

    let schema = provider.get_schema(&config, false, &cancel).await.unwrap();
    assert_eq!(schema.database, "shop");
    let orders = schema.table("main", "orders").expect("orders table");
    let fk = orders
        .column("customer_id")
        .and_then(|c| c.foreign_key.as_ref())
        .expect("customer_id foreign key");
    assert_eq!(fk.table, "customers");
    assert_eq!(fk.column, "id");
    assert_eq!(schema.relations.len(), 1);
    assert!(
        schema
            .table("main", "customers")
            .and_then(|t| t.column("id"))
            .is_some_and(|c| c.is_primary_key && !c.nullable)
    );
}

#[tokio::test]
async fn test_profile_provider_uses_profile_schema_cache() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let config = sqlite_config(&dir, "shop.db");

    let profiles = Arc::new(InMemoryProfileStore::new());
    profiles
        .insert(ProfileRecord::new("prod/shop", "Shop", "shop-secret"))
        .await;
    let secrets = Arc::new(InMemorySecretStore::new());
    secrets
        .insert("shop-secret", config.connection_string.clone())
        .await;
    let factory = ProviderFactory::new(settings.clone(), profiles, secrets).unwrap();
    let cancel = CancellationToken::new();

    let provider = factory
        .create_with_profile("prod/shop", "sqlite", &cancel)
        .await
        .unwrap();
    assert_eq!(provider.bound_connection(), Some(&config));
    seed(provider.as_ref(), &config).await;

    let schema = provider.get_schema(&config, false, &cancel).await.unwrap();
    assert_eq!(schema.tables.len(), 2);

    let backend_dir = settings.cache_directory(BackendKind::Sqlite);
    assert!(!schema_cache_file(&backend_dir, "sqlite").exists());
    let profile_cache = schema_cache_file(&profile_cache_directory(&backend_dir, "prod/shop"), "sqlite");
    assert!(profile_cache.exists(), "missing {}", profile_cache.display());

    // A second call is served from the profile cache even with the database gone
    std::fs::remove_file(dir.path().join("shop.db")).unwrap();
    let cached = provider.get_schema(&config, false, &cancel).await.unwrap();
    assert_eq!(cached, schema);
}

#[tokio::test]
async fn test_profiles_keep_separate_server_caches() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let config = sqlite_config(&dir, "shop.db");
    let cancel = CancellationToken::new();

    let profiles = Arc::new(InMemoryProfileStore::new());
    profiles
        .insert(ProfileRecord::new("billing", "Billing", "shop-secret"))
        .await;
    profiles
        .insert(ProfileRecord::new("reporting", "Reporting", "missing-secret"))
        .await;
    let secrets = Arc::new(InMemorySecretStore::new());
    secrets
        .insert("shop-secret", config.connection_string.clone())
        .await;
    secrets
        .insert(
            "missing-secret",
            sqlite_config(&dir, "missing.db").connection_string,
        )
        .await;
    let factory = ProviderFactory::new(settings.clone(), profiles, secrets).unwrap();

    let backend_dir = settings.cache_directory(BackendKind::Sqlite);
    let billing_cache = server_cache_file(
        &profile_cache_directory(&backend_dir, "billing"),
        BackendKind::Sqlite.dialect(),
    );
    save_and_replace(
        &billing_cache,
        &vec![ServerInfo::new("billing-only", "SQLite")],
        &cancel,
    )
    .await
    .unwrap();

    let billing = factory
        .create_with_profile("billing", "sqlite", &cancel)
        .await
        .unwrap();
    seed(billing.as_ref(), &config).await;
    let reporting = factory
        .create_with_profile("reporting", "sqlite", &cancel)
        .await
        .unwrap();

    // Reporting has no cached list of its own, so it must reach its own
    // (missing) database instead of answering from billing's cache.
    assert!(reporting.get_servers(false, &cancel).await.is_err());
    assert_eq!(
        billing.get_servers(false, &cancel).await.unwrap()[0].name,
        "billing-only"
    );
    assert!(!server_cache_file(&backend_dir, BackendKind::Sqlite.dialect()).exists());
}

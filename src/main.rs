//! db-provider - command-line front end for the database providers.

use db_provider::config::{Command, Config};
use db_provider::models::ExecuteRequest;
use db_provider::store::{
    EnvSecretStore, InMemoryProfileStore, InMemorySecretStore, JsonProfileStore, ProfileRecord,
};
use db_provider::{DatabaseProvider, ProviderFactory};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Name and secret key of the profile registered for a `--connection` flag.
const CLI_PROFILE: &str = "cli";

/// Initialize the tracing subscriber for logging. Output goes to stderr so
/// stdout carries only command results.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Build the provider the command runs against.
///
/// `--profile` resolves through the profiles file and environment secrets;
/// `--connection` is registered as an in-memory profile so both paths share
/// the profile-scoped caches. With neither, the provider is standalone.
async fn build_provider(
    config: &Config,
    cancel: &CancellationToken,
) -> Result<Box<dyn DatabaseProvider>, Box<dyn std::error::Error>> {
    let settings = config.settings();
    let kind = config.kind_tag()?;

    if let Some(profile_id) = &config.profile {
        let factory = ProviderFactory::new(
            settings,
            Arc::new(JsonProfileStore::new(config.profiles_path())),
            Arc::new(EnvSecretStore::default()),
        )?;
        return Ok(factory
            .create_with_profile(profile_id, &kind, cancel)
            .await?);
    }

    match config.connection_config() {
        Some(connection) => {
            // Keyed by target so different connections keep separate caches
            let profile_id = connection.cache_key();
            let profiles = Arc::new(InMemoryProfileStore::new());
            let secrets = Arc::new(InMemorySecretStore::new());
            profiles
                .insert(ProfileRecord::new(&profile_id, CLI_PROFILE, CLI_PROFILE))
                .await;
            secrets
                .insert(CLI_PROFILE, serde_json::to_string(&connection)?)
                .await;
            let factory = ProviderFactory::new(settings, profiles, secrets)?;
            Ok(factory
                .create_with_profile(&profile_id, &kind, cancel)
                .await?)
        }
        None => Ok(ProviderFactory::standalone(settings)?.create_standalone(&kind)?),
    }
}

async fn run(config: Config, cancel: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
    let provider = build_provider(&config, &cancel).await?;
    let bound = provider.bound_connection().cloned();
    let require_bound = || {
        bound
            .clone()
            .ok_or("This command needs --connection or --profile")
    };

    match config.command {
        Command::Check => {
            let reachable = provider.check_connection(&require_bound()?, &cancel).await?;
            print_json(&serde_json::json!({ "reachable": reachable }))?;
        }
        Command::Servers { refresh } => {
            print_json(&provider.get_servers(refresh, &cancel).await?)?;
        }
        Command::Databases { server } => {
            let databases = match server {
                Some(server) => provider.get_databases_on_server(&server, &cancel).await?,
                None => provider.get_databases(&require_bound()?, &cancel).await?,
            };
            print_json(&databases)?;
        }
        Command::Schema { refresh, text } => {
            let schema = provider
                .get_schema(&require_bound()?, refresh, &cancel)
                .await?;
            if text {
                print!("{}", schema.to_prompt_text());
            } else {
                print_json(&schema)?;
            }
        }
        Command::Execute {
            sql,
            write,
            params,
            user_query,
        } => {
            let mut request = ExecuteRequest::new(sql).with_mode(Command::execution_mode(write));
            if let Some(user_query) = user_query {
                request = request.with_user_query(user_query);
            }
            for (name, value) in params {
                request = request.with_param(name, value);
            }
            match provider.execute(&require_bound()?, &request, &cancel).await {
                Ok(result) => print_json(&result)?,
                Err(e) => {
                    if let Some(partial) = e.execution_result() {
                        print_json(partial)?;
                    }
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    info!(
        command = ?config.command,
        "Starting db-provider v{}",
        env!("CARGO_PKG_VERSION")
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    if let Err(e) = run(config, cancel).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}

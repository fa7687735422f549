//! Village management CLI
//!
//! Thin front end over `village-client`:
//! 1. Loads TOML config (`--config` > `CONFIG_PATH` > `village-cli.toml`)
//! 2. Opens the session file
//! 3. Runs one command (`login`, `logout`, `whoami`, `request`)
//!
//! Logs go to stderr as JSON (or text with `--log-format text`); command
//! output goes to stdout.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use village_client::{
    ApiClient, CallbackObserver, CancellationToken, CredentialStore, Method, RequestDescriptor,
};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(
    name = "village-cli",
    version,
    about = "Command-line client for the village management API"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and store the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "VILLAGE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Revoke the session and delete it locally
    Logout,
    /// Check the stored session and print the cached profile
    Whoami,
    /// Send an authenticated request and print the response envelope
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,
        /// Endpoint path relative to the API base URL, e.g. /apartments
        endpoint: String,
        /// Query parameter as key=value; repeatable
        #[arg(long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },
}

fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_method(raw: &str) -> Result<Method> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method `{raw}`"))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn build_client(config: &Config) -> Result<ApiClient> {
    let session_path = &config.credentials.path;
    if let Some(dir) = session_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let store = CredentialStore::load(session_path.clone())
        .await
        .with_context(|| format!("failed to open session file {}", session_path.display()))?;

    let observer = CallbackObserver::new(
        |_session| info!("session refreshed"),
        || warn!("session expired, run `village-cli login` again"),
    );

    ApiClient::builder(&config.api.base_url)
        .timeout(config.timeout())
        .credential_store(Arc::new(store))
        .session_observer(Arc::new(observer))
        .build()
        .context("failed to build API client")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(client: &ApiClient, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let user = client.login(&email, &password).await.context("login failed")?;
            print_json(&user)
        }
        Command::Logout => {
            client.logout().await.context("logout failed")?;
            info!("session cleared");
            Ok(())
        }
        Command::Whoami => {
            if !client.validate_token().await {
                bail!("not logged in");
            }
            match client.current_user().await {
                Some(user) => print_json(&user),
                None => bail!("session has no cached profile"),
            }
        }
        Command::Request {
            method,
            endpoint,
            query,
            data,
        } => {
            let mut descriptor =
                RequestDescriptor::new(parse_method(&method)?, endpoint).with_query(query);
            if let Some(data) = data {
                let body: serde_json::Value =
                    serde_json::from_str(&data).context("--data is not valid JSON")?;
                descriptor = descriptor.with_body(body);
            }

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let response = client
                .execute_cancellable(&descriptor, &cancel)
                .await
                .with_context(|| {
                    format!("{} {} failed", descriptor.method(), descriptor.endpoint())
                })?;
            print_json(&response)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.api.base_url,
        timeout_secs = config.api.timeout_secs,
        session = %config.credentials.path.display(),
        "configuration loaded"
    );

    let client = build_client(&config).await?;
    run(&client, cli.command).await
}

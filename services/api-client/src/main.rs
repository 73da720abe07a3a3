//! API client
//!
//! Composition root for the request dispatcher:
//! 1. Loads configuration (TOML + env overrides)
//! 2. Opens the file-backed session store
//! 3. Wires store, HTTP transport and terminal notifications into one `Dispatcher`
//! 4. Runs a single command and prints the result as JSON

mod cli;
mod config;
mod console;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dispatcher::{Dispatcher, NormalizedError, ReqwestTransport, RequestOptions};
use reqwest::Method;
use serde_json::{Value, json};
use session_store::{CredentialPair, FileStore};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::console::ConsoleSink;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // JSON logs on stderr; stdout carries command output only
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let prometheus = if cli.metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let store = FileStore::load(config.store.path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open session store {}",
                config.store.path.display()
            )
        })?;
    let transport = ReqwestTransport::build().context("failed to build HTTP client")?;

    let dispatcher = Dispatcher::new(
        config.client,
        Arc::new(transport),
        Arc::new(store),
        Arc::new(ConsoleSink::stderr()),
    );

    let outcome = run(&dispatcher, cli.command).await;

    if let Ok(value) = &outcome {
        let rendered =
            serde_json::to_string_pretty(value).context("failed to render response")?;
        println!("{rendered}");
    }
    if let Some(handle) = prometheus {
        print!("{}", handle.render());
    }

    outcome.map(|_| ())
}

async fn run(dispatcher: &Dispatcher, command: Command) -> Result<Value> {
    match command {
        Command::Get { url } => send(dispatcher, Method::GET, &url, None).await,
        Command::Delete { url } => send(dispatcher, Method::DELETE, &url, None).await,
        Command::Post { url, body } => send(dispatcher, Method::POST, &url, Some(body)).await,
        Command::Put { url, body } => send(dispatcher, Method::PUT, &url, Some(body)).await,
        Command::Patch { url, body } => send(dispatcher, Method::PATCH, &url, Some(body)).await,
        Command::Login { access, refresh } => {
            dispatcher
                .login(&CredentialPair::new(access, refresh))
                .await
                .context("failed to store credentials")?;
            Ok(json!({"authenticated": true}))
        }
        Command::Logout => {
            dispatcher.logout().await;
            Ok(json!({"authenticated": false}))
        }
        Command::Status => {
            let vault = dispatcher.vault();
            Ok(json!({
                "authenticated": dispatcher.is_authenticated().await,
                "user_id": vault.user_id().await,
                "base_url": dispatcher.config().await.base_url,
            }))
        }
    }
}

async fn send(
    dispatcher: &Dispatcher,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value> {
    dispatcher
        .request(method, url, body, RequestOptions::default())
        .await
        .map_err(describe)
}

/// Keep the normalized code and message, plus server details when present.
fn describe(err: NormalizedError) -> anyhow::Error {
    match err.details() {
        Some(details) => anyhow::anyhow!("{err} ({details})"),
        None => anyhow::Error::new(err),
    }
}

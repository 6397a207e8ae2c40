use std::io;

use anyhow::{Context, Result};
use reqwest::Url;
use resync_app::{HttpSource, PollOutcome, ProjectConfig, Source, SyncService};
use resync_core::CacheKey;
use resync_notify::{JsonLinesSink, Notifier};
use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::info;

use crate::Command;

/// Dispatch a parsed command.
pub fn run(command: Command, config: ProjectConfig) -> Result<()> {
    match command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Fetch { key } => runtime()?.block_on(fetch(&config, &key)),
        Command::Poll {
            key,
            return_url,
            min_len,
            max_attempts,
            interval_ms,
        } => {
            let mut config = config;
            if let Some(max_attempts) = max_attempts {
                config.poll.max_attempts = max_attempts;
            }
            if let Some(interval_ms) = interval_ms {
                config.poll.interval_ms = interval_ms;
            }
            runtime()?.block_on(poll(config, key, &return_url, min_len))
        }
    }
}

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

async fn fetch(config: &ProjectConfig, key: &CacheKey) -> Result<()> {
    let source = HttpSource::from_config(&config.http)?;
    let value: Value = Source::<Value>::fetch(&source, key)
        .await
        .with_context(|| format!("failed to fetch {key}"))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn poll(config: ProjectConfig, key: CacheKey, return_url: &Url, min_len: usize) -> Result<()> {
    let source = HttpSource::from_config(&config.http)?;
    let notifier = Notifier::new(config.notify.clone()).with_sink(JsonLinesSink::new(io::stdout()));
    let service: SyncService<Value, HttpSource> = SyncService::new(source, config, notifier);

    let reconciliation = service
        .reconcile_redirect(return_url, key.clone(), move |value: &Value| has_min_len(value, min_len))
        .await?;
    let Some(reconciliation) = reconciliation else {
        info!(url = %return_url, "No redirect signal; nothing to reconcile");
        println!("{return_url}");
        return Ok(());
    };

    if let Some(url) = &reconciliation.replace_url {
        println!("{url}");
    }
    match reconciliation.outcome {
        Some(PollOutcome::Failed { error, .. }) => {
            Err(error).with_context(|| format!("reconciliation of {key} failed"))
        }
        Some(outcome) => {
            info!(%key, attempts = outcome.attempts(), "Reconciliation finished");
            Ok(())
        }
        None => Ok(()),
    }
}

fn has_min_len(value: &Value, min_len: usize) -> bool {
    value.as_array().is_some_and(|items| items.len() >= min_len)
}

//! CLI entry point for resync.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use reqwest::Url;
use resync_app::ProjectConfig;
use resync_core::CacheKey;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod commands;

/// Fetch and reconcile remote state the way the app caches it.
#[derive(Parser, Debug)]
#[command(
    name = "resync",
    version,
    about = "resync: optimistic cache reconciliation against a JSON API"
)]
struct Cli {
    /// Directory holding `.resync/config.toml` (defaults to current).
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Override `http.base_url` from the configuration.
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration as TOML.
    Config,

    /// Fetch a key (e.g. `payment-methods/cus_1`) and print its JSON value.
    Fetch {
        key: CacheKey,
    },

    /// Reconcile a redirect: poll a key until it lists enough items.
    Poll {
        key: CacheKey,
        /// URL the external flow redirected back to.
        #[arg(long)]
        return_url: Url,
        /// Number of array items that confirms the change.
        #[arg(long, default_value_t = 1)]
        min_len: usize,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_attempts: Option<u32>,
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    let Cli { workdir, base_url, cmd } = Cli::parse();
    install_tracing();

    let workdir = workdir.unwrap_or_else(|| PathBuf::from("."));
    let config = load_config(&workdir, base_url)?;
    commands::run(cmd, config)
}

fn load_config(workdir: &std::path::Path, base_url: Option<String>) -> Result<ProjectConfig> {
    let mut config = ProjectConfig::from_workdir(workdir)?;
    if base_url.is_some() {
        config.http.base_url = base_url;
        config.http.base_url()?;
    }
    Ok(config)
}

fn install_tracing() {
    // RUST_LOG is honoured; INFO by default. stdout is reserved for output.
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parse_config_command() {
        let cli = Cli::parse_from(["resync", "--workdir", "/tmp/project", "config"]);
        assert_eq!(cli.workdir, Some(PathBuf::from("/tmp/project")));
        assert!(matches!(cli.cmd, Command::Config));
    }

    #[test]
    fn parse_fetch_command() {
        let cli = Cli::parse_from(["resync", "fetch", "reviews/received/3"]);
        match cli.cmd {
            Command::Fetch { key } => {
                assert_eq!(key, CacheKey::resource("reviews").with("received").with(3_i64));
            }
            _ => panic!("expected fetch command"),
        }
    }

    #[test]
    fn parse_poll_command() {
        let cli = Cli::parse_from([
            "resync",
            "--base-url",
            "https://api.example.test/v1",
            "poll",
            "payment-methods/cus_1",
            "--return-url",
            "https://app.example.test/billing?status=success&customer_id=cus_1",
            "--min-len",
            "3",
            "--max-attempts",
            "4",
        ]);

        assert_eq!(cli.base_url.as_deref(), Some("https://api.example.test/v1"));
        match cli.cmd {
            Command::Poll {
                key,
                return_url,
                min_len,
                max_attempts,
                interval_ms,
            } => {
                assert_eq!(key.to_string(), "payment-methods/cus_1");
                assert_eq!(return_url.query(), Some("status=success&customer_id=cus_1"));
                assert_eq!(min_len, 3);
                assert_eq!(max_attempts, Some(4));
                assert_eq!(interval_ms, None);
            }
            _ => panic!("expected poll command"),
        }
    }

    #[test]
    fn poll_rejects_zero_attempts() {
        let parsed = Cli::try_parse_from([
            "resync",
            "poll",
            "payment-methods/cus_1",
            "--return-url",
            "https://app.example.test/billing",
            "--max-attempts",
            "0",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn base_url_flag_overrides_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join(".resync"))?;
        fs::write(
            dir.path().join(".resync/config.toml"),
            "[http]\nbase_url = \"https://config.example.test\"\n",
        )?;

        let from_file = load_config(dir.path(), None)?;
        assert_eq!(from_file.http.base_url.as_deref(), Some("https://config.example.test"));

        let overridden = load_config(dir.path(), Some("https://flag.example.test".into()))?;
        assert_eq!(overridden.http.base_url.as_deref(), Some("https://flag.example.test"));

        assert!(load_config(dir.path(), Some("not a url".into())).is_err());
        Ok(())
    }
}

//! Project configuration.

use std::{env, fs, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use reqwest::Url;
use resync_notify::NotifyConfig;
use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = ".resync";
const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration loaded from `.resync/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProjectConfig {
    /// Reconciliation poll budget.
    #[serde(default)]
    pub poll: PollConfig,
    /// Refresh debouncing.
    #[serde(default)]
    pub invalidation: InvalidationConfig,
    /// Redirect signal parameters.
    #[serde(default)]
    pub redirect: RedirectConfig,
    /// Notice delivery.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Remote API used by the HTTP source.
    #[serde(default)]
    pub http: HttpConfig,
}

impl ProjectConfig {
    /// Load configuration from a known working directory.
    ///
    /// A missing file yields the built-in defaults.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, parsed or validated.
    pub fn from_workdir(workdir: impl AsRef<Path>) -> Result<Self> {
        let config_path = workdir.as_ref().join(CONFIG_DIR).join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("failed to parse {}", config_path.display()))
    }

    /// Parse and validate configuration from TOML text.
    ///
    /// # Errors
    /// Returns an error for malformed TOML or out-of-range values.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }

    fn validate(&self) -> Result<()> {
        self.poll.validate()?;
        self.redirect.validate()?;
        self.http.validate()?;
        let unknown = self.notify.unknown_kinds();
        if !unknown.is_empty() {
            bail!("unknown notice kinds in [notify]: {}", unknown.join(", "));
        }
        Ok(())
    }
}

/// Reconciliation poll budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Maximum number of re-fetches before the poll times out.
    pub max_attempts: u32,
    /// Delay between re-fetches, in milliseconds.
    pub interval_ms: u64,
    /// Schedule one best-effort refresh after a timeout.
    pub final_refresh: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            interval_ms: 2000,
            final_refresh: true,
        }
    }
}

impl PollConfig {
    /// Delay between re-fetches.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Nominal worst-case detection window (`max_attempts × interval`).
    ///
    /// A fetch stuck in the transport can exceed this window.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.interval().saturating_mul(self.max_attempts)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("poll.max_attempts must be at least 1");
        }
        if self.interval_ms == 0 {
            bail!("poll.interval_ms must be greater than 0");
        }
        Ok(())
    }
}

/// Debounce window for background refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Window in which repeated refresh requests for a key coalesce, in milliseconds.
    pub debounce_ms: u64,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self { debounce_ms: 250 }
    }
}

impl InvalidationConfig {
    /// Debounce window.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Query parameters that signal a completed external redirect flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Parameter carrying the flow status.
    pub status_param: String,
    /// Status value that starts a reconciliation poll.
    pub success_value: String,
    /// Correlating parameters removed together with the status.
    pub correlation_params: Vec<String>,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            status_param: "status".into(),
            success_value: "success".into(),
            correlation_params: vec!["customer_id".into()],
        }
    }
}

impl RedirectConfig {
    fn validate(&self) -> Result<()> {
        if self.status_param.trim().is_empty() {
            bail!("redirect.status_param must not be empty");
        }
        if self.success_value.trim().is_empty() {
            bail!("redirect.success_value must not be empty");
        }
        Ok(())
    }
}

/// Remote API settings used by the HTTP source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Base URL that cache keys are resolved against.
    pub base_url: Option<String>,
    /// Environment variable holding a bearer token.
    pub token_env: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token_env: "RESYNC_API_TOKEN".into(),
        }
    }
}

impl HttpConfig {
    /// Parsed base URL, if configured.
    ///
    /// # Errors
    /// Returns an error when the configured value is not a URL.
    pub fn base_url(&self) -> Result<Option<Url>> {
        self.base_url
            .as_deref()
            .map(|raw| Url::parse(raw).with_context(|| format!("invalid http.base_url '{raw}'")))
            .transpose()
    }

    /// Bearer token read from the configured environment variable.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        env::var(&self.token_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }

    fn validate(&self) -> Result<()> {
        self.base_url().map(|_| ())
    }
}

//! Configuration loader and validator for the hub's Reddit cache and refresh job.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub reddit: Reddit,
    #[serde(default)]
    pub embeds: Embeds,
    #[serde(default)]
    pub refresh: Refresh,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Reddit script-app credentials. Each field can be overridden by its
/// environment variable (see [`Config::apply_env_overrides`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reddit {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// How many embeds to keep and how deep into the hot listing to look.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Embeds {
    pub limit: usize,
    pub scan_limit: usize,
}

impl Default for Embeds {
    fn default() -> Self {
        Self {
            limit: 2,
            scan_limit: 10,
        }
    }
}

/// Periodic refresh schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Refresh {
    pub interval_hours: u64,
    #[serde(default)]
    pub run_on_startup: bool,
}

impl Default for Refresh {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            run_on_startup: false,
        }
    }
}

/// Longest accepted refresh interval: one year.
pub const MAX_REFRESH_INTERVAL_HOURS: u64 = 24 * 366;

fn default_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Default SQLite URL inside `app.data_dir`, unless `DATABASE_URL` is set.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}/tunerguy.db",
                self.app.data_dir.trim_end_matches('/')
            )
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.reddit.request_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_hours.saturating_mul(60 * 60))
    }

    /// Replace reddit credentials with `REDDIT_*` environment variables when
    /// they are set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let r = &mut self.reddit;
        let slots: [(&str, &mut String); 5] = [
            ("REDDIT_ID", &mut r.client_id),
            ("REDDIT_SECRET", &mut r.client_secret),
            ("REDDIT_USER_AGENT", &mut r.user_agent),
            ("REDDIT_USER", &mut r.username),
            ("REDDIT_USER_PW", &mut r.password),
        ];
        for (key, slot) in slots {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }
    }
}

/// Load configuration from a YAML file, apply env overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    let r = &cfg.reddit;
    if r.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.client_id must be non-empty"));
    }
    if r.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.client_secret must be non-empty"));
    }
    if r.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.user_agent must be non-empty"));
    }
    if r.username.trim().is_empty() {
        return Err(ConfigError::Invalid("reddit.username must be non-empty"));
    }
    if r.password.is_empty() {
        return Err(ConfigError::Invalid("reddit.password must be non-empty"));
    }
    if r.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("reddit.request_timeout_secs must be > 0"));
    }

    if cfg.embeds.limit == 0 {
        return Err(ConfigError::Invalid("embeds.limit must be > 0"));
    }
    if cfg.embeds.scan_limit < cfg.embeds.limit {
        return Err(ConfigError::Invalid("embeds.scan_limit must be >= embeds.limit"));
    }
    // Reddit caps listings at 100 items per request.
    if cfg.embeds.scan_limit > 100 {
        return Err(ConfigError::Invalid("embeds.scan_limit must be <= 100"));
    }

    if cfg.refresh.interval_hours == 0 {
        return Err(ConfigError::Invalid("refresh.interval_hours must be > 0"));
    }
    if cfg.refresh.interval_hours > MAX_REFRESH_INTERVAL_HOURS {
        return Err(ConfigError::Invalid("refresh.interval_hours must be <= 8784 (one year)"));
    }

    Ok(())
}

/// Returns the example YAML content shipped with the repository.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

reddit:
  client_id: "YOUR_REDDIT_CLIENT_ID"
  client_secret: "YOUR_REDDIT_CLIENT_SECRET"
  user_agent: "tunerguy-hub/0.1 by YOUR_REDDIT_USERNAME"
  username: "YOUR_REDDIT_USERNAME"
  password: "YOUR_REDDIT_PASSWORD"
  request_timeout_secs: 10

embeds:
  limit: 2
  scan_limit: 10

refresh:
  interval_hours: 24
  run_on_startup: false
"#
}

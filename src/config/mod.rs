//! Configuration management for horizons
//!
//! Handles loading, saving, and validating configuration from TOML files.
//! Followees and their sources live in the same file as the runtime settings.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::registry::SourceRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Fetching configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Summarization collaborator configuration
    #[serde(default)]
    pub summarizer: SummarizerConfig,

    /// Digest delivery configuration
    #[serde(default)]
    pub mail: MailConfig,

    /// Digest windowing
    #[serde(default)]
    pub digest: DigestConfig,

    /// Followees keyed by slug
    #[serde(default)]
    pub followees: BTreeMap<String, FolloweeConfig>,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// User agent string
    #[serde(default = "default_fetch_user_agent")]
    pub user_agent: String,

    /// Maximum characters of body text kept per item
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,

    /// Sources fetched at the same time
    #[serde(default = "default_fetch_concurrency")]
    pub concurrency: usize,

    /// Extra attempts after a failed fetch, within one run
    #[serde(default = "default_fetch_retries")]
    pub retries: u32,

    /// Pause between attempts (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Requests per second per host
    #[serde(default = "default_fetch_rate_limit")]
    pub rate_limit_per_host: f64,
}

/// Summarizer configuration (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_summarizer_api_url")]
    pub api_url: String,

    #[serde(default = "default_summarizer_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_summarizer_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_summarizer_timeout")]
    pub timeout_secs: u64,

    /// Item text beyond this many characters is cut before sending
    #[serde(default = "default_summarizer_max_input_chars")]
    pub max_input_chars: usize,

    #[serde(default = "default_summarizer_temperature")]
    pub temperature: f32,

    #[serde(default = "default_summarizer_requests_per_minute")]
    pub requests_per_minute: u32,
}

/// SMTP delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// SMTP login (usually the sender address)
    #[serde(default)]
    pub username: String,

    /// Environment variable holding the SMTP password
    #[serde(default = "default_smtp_password_env")]
    pub password_env: String,

    /// Sender address; falls back to `username` when empty
    #[serde(default)]
    pub from: String,

    #[serde(default)]
    pub recipients: Vec<String>,

    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

/// Digest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    /// Only items published within this many days make it into a digest
    #[serde(default = "default_history_days")]
    pub history_days: u32,

    #[serde(default = "default_digest_max_items")]
    pub max_items: usize,
}

/// A followed person or organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolloweeConfig {
    pub display_name: String,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// One channel a followee publishes through
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable identifier; derived from the followee and position when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// `rss` or `webpage`
    pub kind: String,

    /// Feed or page URL
    pub locator: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Minimum seconds between fetches; every run when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence_secs: Option<u64>,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for horizons data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the SQLite archive
    pub db_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            summarizer: SummarizerConfig::default(),
            mail: MailConfig::default(),
            digest: DigestConfig::default(),
            followees: BTreeMap::new(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            user_agent: default_fetch_user_agent(),
            max_body_chars: default_max_body_chars(),
            concurrency: default_fetch_concurrency(),
            retries: default_fetch_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            rate_limit_per_host: default_fetch_rate_limit(),
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_url: default_summarizer_api_url(),
            model: default_summarizer_model(),
            api_key_env: default_summarizer_api_key_env(),
            timeout_secs: default_summarizer_timeout(),
            max_input_chars: default_summarizer_max_input_chars(),
            temperature: default_summarizer_temperature(),
            requests_per_minute: default_summarizer_requests_per_minute(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password_env: default_smtp_password_env(),
            from: String::new(),
            recipients: Vec::new(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            history_days: default_history_days(),
            max_items: default_digest_max_items(),
        }
    }
}

impl Config {
    /// Get the default base directory for horizons (~/.horizons, or $HORIZONS_HOME)
    pub fn default_base_dir() -> PathBuf {
        if let Ok(home) = std::env::var("HORIZONS_HOME") {
            if !home.trim().is_empty() {
                return PathBuf::from(home);
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".horizons")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Point all paths at a base directory
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("archive.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config = Self::from_toml_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("archive.db"),
            base_dir: base,
        };

        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_config_path())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Read the summarizer API key from the environment
    pub fn summarizer_api_key(&self) -> Option<String> {
        read_secret(&self.summarizer.api_key_env)
    }

    /// Read the SMTP password from the environment
    pub fn smtp_password(&self) -> Option<String> {
        read_secret(&self.mail.password_env)
    }

    /// Check if horizons is initialized (config and archive exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration, including the followee/source registry
    pub fn validate(&self) -> Result<()> {
        if self.fetch.timeout_secs == 0 {
            return Err(Error::Config(
                "fetch.timeout_secs must be positive".to_string(),
            ));
        }

        if self.fetch.concurrency == 0 {
            return Err(Error::Config(
                "fetch.concurrency must be at least 1".to_string(),
            ));
        }

        if self.fetch.max_body_chars == 0 {
            return Err(Error::Config(
                "fetch.max_body_chars must be positive".to_string(),
            ));
        }

        if self.fetch.rate_limit_per_host <= 0.0 || !self.fetch.rate_limit_per_host.is_finite() {
            return Err(Error::Config(
                "fetch.rate_limit_per_host must be positive".to_string(),
            ));
        }

        if self.summarizer.requests_per_minute == 0 {
            return Err(Error::Config(
                "summarizer.requests_per_minute must be positive".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.summarizer.temperature) {
            return Err(Error::Config(
                "summarizer.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.digest.history_days == 0 {
            return Err(Error::Config(
                "digest.history_days must be positive".to_string(),
            ));
        }

        SourceRegistry::from_config(self)?;
        Ok(())
    }

    /// A starter configuration with one example followee
    pub fn example() -> Self {
        let mut config = Config::default();
        config.followees.insert(
            "minimax".to_string(),
            FolloweeConfig {
                display_name: "MiniMax".to_string(),
                sources: vec![SourceConfig {
                    id: None,
                    kind: "rss".to_string(),
                    locator: "https://www.minimax.io/feed".to_string(),
                    name: Some("MiniMax Official Blog".to_string()),
                    cadence_secs: None,
                }],
            },
        );
        config
    }
}

fn read_secret(var: &str) -> Option<String> {
    if var.is_empty() {
        return None;
    }
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch.timeout_secs, 15);
        assert_eq!(config.fetch.max_body_chars, 20_000);
        assert_eq!(config.digest.history_days, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::example();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.fetch.concurrency = 8;

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load(&config.paths.config_file).unwrap();
        assert_eq!(loaded.fetch.concurrency, 8);
        assert_eq!(loaded.followees.len(), 1);
        assert_eq!(loaded.followees["minimax"].sources[0].kind, "rss");
        assert_eq!(loaded.paths.db_file, tmp.path().join("archive.db"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [fetch]
            timeout_secs = 5

            [followees.alice]
            display_name = "Alice"

            [[followees.alice.sources]]
            kind = "rss"
            locator = "https://alice.example.com/feed.xml"
            "#,
        )
        .unwrap();

        assert_eq!(config.fetch.timeout_secs, 5);
        assert_eq!(config.fetch.concurrency, 4);
        assert_eq!(config.mail.smtp_port, 465);
        assert_eq!(config.followees["alice"].sources.len(), 1);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.fetch.timeout_secs = 0;
        assert!(config.validate().is_err());

        config.fetch.timeout_secs = 10;
        config.fetch.rate_limit_per_host = 0.0;
        assert!(config.validate().is_err());

        config.fetch.rate_limit_per_host = 1.0;
        config.digest.history_days = 0;
        assert!(config.validate().is_err());

        config.digest.history_days = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_source_kind_is_config_error() {
        let result = Config::from_toml_str(
            r#"
            [followees.bob]
            display_name = "Bob"

            [[followees.bob.sources]]
            kind = "youtube"
            locator = "https://youtube.com/@bob"
            "#,
        );

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let result = Config::load(&tmp.path().join("nope.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

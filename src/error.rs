//! Custom error types for horizons

use thiserror::Error;

/// Main error type for horizons operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch failed for source {source_id}: {cause}")]
    Fetch { source_id: String, cause: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid status transition for item {item_id}: {from} -> {to}")]
    InvalidTransition {
        item_id: String,
        from: String,
        to: String,
    },

    #[error("Run {0} is already finalized")]
    RunFinalized(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Summarizer error: {0}")]
    Summarize(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Not initialized: run 'horizons init' first")]
    NotInitialized,

    #[error("Already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a fetch error for a source
    pub fn fetch(source_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Error::Fetch {
            source_id: source_id.into(),
            cause: cause.to_string(),
        }
    }

    /// True when the archive itself failed (as opposed to a source or input)
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Database(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<lettre::error::Error> for Error {
    fn from(err: lettre::error::Error) -> Self {
        Error::Mail(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for Error {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        Error::Mail(err.to_string())
    }
}

impl From<lettre::address::AddressError> for Error {
    fn from(err: lettre::address::AddressError) -> Self {
        Error::Mail(err.to_string())
    }
}

/// Result type alias for horizons
pub type Result<T> = std::result::Result<T, Error>;

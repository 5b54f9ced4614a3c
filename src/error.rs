use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Query error: {message}")]
    Query { message: String, sql: Option<String> },
    #[error("Fetch error: {0}")]
    Fetch(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Key map error: {0}")]
    KeyMap(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SourceError>;

impl SourceError {
    pub fn query(message: impl Into<String>, sql: &str) -> Self {
        Self::Query { message: message.into(), sql: Some(sql.to_string()) }
    }
    /// Only configuration problems are unrecoverable; everything else is left
    /// to the orchestrator to abort or skip on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

// Helper conversions
impl From<config::ConfigError> for SourceError {
    fn from(e: config::ConfigError) -> Self { Self::Configuration(e.to_string()) }
}
impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self { Self::Io(e.into()) }
}

use thiserror::Error;

/// Fatal startup errors. Nothing is listening yet when one of these is raised.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Invalid CIDR in cidr_ignore: {0:?}")]
    InvalidCidr(String),

    #[error("Failed to open GeoIP database {path}: {reason}")]
    GeoDatabase { path: String, reason: String },

    #[error("Failed to build storage client: {0}")]
    Storage(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Load(Box::new(e))
    }
}

/// Per-record rejection raised by the parser. Never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Field count differs from the expected 11.
    #[error("Error parsing raw message ({fields} fields): {line}")]
    Malformed { fields: usize, line: String },

    /// Status outside [100, 511]. The load balancer emits these for
    /// requests that were retried or never completed upstream.
    #[error("Invalid status code {status}: {host}{uri}")]
    RejectedStatus {
        status: i64,
        host: String,
        uri: String,
    },
}

impl RecordError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, RecordError::Malformed { .. })
    }
}

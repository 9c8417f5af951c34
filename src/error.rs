use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for httpext operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which kind of TLS file a path refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Client certificate
    Cert,
    /// Client private key
    Key,
    /// Certificate authority bundle
    Ca,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Cert => f.write_str("Cert"),
            FileKind::Key => f.write_str("Key"),
            FileKind::Ca => f.write_str("CA"),
        }
    }
}

/// Stage of client construction that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Assembling the TLS configuration from files
    Tls,
    /// Building the underlying HTTP transport
    Transport,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStage::Tls => f.write_str("TLS config"),
            BuildStage::Transport => f.write_str("HTTP transport"),
        }
    }
}

/// Main error type for httpext
#[derive(Error, Debug)]
pub enum Error {
    /// A TLS file reference is missing or is not a regular file
    #[error("{kind} file '{}' does not exist", path.display())]
    InvalidPath { kind: FileKind, path: PathBuf },

    /// The client certificate and key could not be loaded as a pair
    #[error("failed to load key pair (cert '{}', key '{}'): {reason}", cert.display(), key.display())]
    KeyPairLoad {
        cert: PathBuf,
        key: PathBuf,
        reason: String,
    },

    /// A CA file did not contribute any certificate to the trust pool
    #[error("failed to append certs from: {} ({reason})", path.display())]
    CaAppend { path: PathBuf, reason: String },

    /// A construction stage failed
    #[error("failed to create {stage}: {source}")]
    Build {
        stage: BuildStage,
        #[source]
        source: Box<Error>,
    },

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File system errors
    #[error("failed to read file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// SSL/TLS errors
    #[error("SSL/TLS error: {0}")]
    Tls(String),

    /// Invalid request configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generic error with custom message
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Wrap an error with the construction stage that produced it
    pub fn build(stage: BuildStage, source: Error) -> Self {
        Error::Build {
            stage,
            source: Box::new(source),
        }
    }

    /// Create a new file system error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a new TLS error
    pub fn tls(message: impl Into<String>) -> Self {
        Error::Tls(message.into())
    }

    /// Create a new custom error
    pub fn custom(message: impl Into<String>) -> Self {
        Error::Custom(message.into())
    }

    /// Check if this is a network error
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Check if this error, or the error it wraps, is a missing TLS file
    pub fn is_invalid_path(&self) -> bool {
        match self {
            Error::InvalidPath { .. } => true,
            Error::Build { source, .. } => source.is_invalid_path(),
            _ => false,
        }
    }

    /// Get the construction stage if this is a build error
    pub fn stage(&self) -> Option<BuildStage> {
        match self {
            Error::Build { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Get the underlying reqwest error if this is a network error
    pub fn as_network_error(&self) -> Option<&reqwest::Error> {
        match self {
            Error::Network(e) => Some(e),
            _ => None,
        }
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Error::InvalidRequest(format!("Invalid header name: {}", err))
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Error::InvalidRequest(format!("Invalid header value: {}", err))
    }
}

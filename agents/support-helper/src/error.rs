//! Error types for the Support Helper Agent
//!
//! Two families live here:
//!
//! - [`SupportError`]: setup and I/O failures (configuration, files,
//!   serialization). These abort the invocation before or after a query runs.
//! - [`QueryError`]: failures of a single query once it has passed the safety
//!   screen. These end the query in the `Failed` state and are recorded in the
//!   metrics row; they never surface as a successful-looking response.

use std::fmt;

use thiserror::Error;

/// Main error type for agent setup and I/O operations
#[derive(Error, Debug)]
pub enum SupportError {
    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// File access or I/O error
    #[error("File error: {0}")]
    FileError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl SupportError {
    /// Create a configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        SupportError::ConfigError(msg.into())
    }

    /// Create a file error
    pub fn file_error(msg: impl Into<String>) -> Self {
        SupportError::FileError(msg.into())
    }

    /// Check if this is a user-facing error (vs internal)
    pub fn is_user_error(&self) -> bool {
        matches!(self, SupportError::ConfigError(_))
    }
}

impl From<std::io::Error> for SupportError {
    fn from(err: std::io::Error) -> Self {
        SupportError::FileError(err.to_string())
    }
}

impl From<serde_json::Error> for SupportError {
    fn from(err: serde_json::Error) -> Self {
        SupportError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for SupportError {
    fn from(err: serde_yaml::Error) -> Self {
        SupportError::SerializationError(format!("YAML error: {}", err))
    }
}

impl From<toml::de::Error> for SupportError {
    fn from(err: toml::de::Error) -> Self {
        SupportError::ConfigError(format!("TOML error: {}", err))
    }
}

impl From<regex::Error> for SupportError {
    fn from(err: regex::Error) -> Self {
        SupportError::ConfigError(format!("Invalid safety pattern: {}", err))
    }
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, SupportError>;

/// Failure talking to the model API.
///
/// Every variant is the same "API failure" condition from the caller's point
/// of view; the variants only exist so the retry policy and the logs can tell
/// them apart.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed API response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Whether a retry could plausibly succeed (timeouts, connection drops,
    /// rate limiting, server errors)
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Connection(_) => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_decode() {
            TransportError::InvalidResponse(err.to_string())
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}

/// Which validator stage produced a [`SchemaError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    /// The raw reply parsed as an object but violated the schema, and no
    /// recovery candidate fared better
    Strict,
    /// Recovery ran and could not produce a valid object
    Recovery,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseStage::Strict => write!(f, "strict"),
            ParseStage::Recovery => write!(f, "recovery"),
        }
    }
}

/// The model replied, but the reply could not be coerced into a
/// `StructuredResponse`, even after recovery.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Schema error ({stage}): {message}")]
pub struct SchemaError {
    pub message: String,
    pub stage: ParseStage,
    /// Full model output, kept for diagnostic logging
    pub raw_output: String,
}

impl SchemaError {
    pub fn new(
        message: impl Into<String>,
        stage: ParseStage,
        raw_output: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            stage,
            raw_output: raw_output.into(),
        }
    }
}

/// Why an allowed query ended in the `Failed` state
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("{scope} too long: {estimated} tokens (max: {limit})")]
    PromptTooLarge {
        scope: &'static str,
        estimated: usize,
        limit: usize,
    },
}

impl QueryError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Transport(_) => "transport_error",
            QueryError::Schema(_) => "schema_error",
            QueryError::PromptTooLarge { .. } => "prompt_too_large",
        }
    }
}

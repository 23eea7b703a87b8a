use thiserror::Error;

/// Main error type for the coordination engine
#[derive(Error, Debug)]
pub enum CoSenseError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Input boundary errors
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // External capability errors
    #[error("Actuation failed: {0}")]
    Actuation(String),

    #[error("Enrichment failed: {0}")]
    Enrichment(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    // Pipeline plumbing errors
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for CoSenseError
pub type Result<T> = std::result::Result<T, CoSenseError>;

/// Specific error types for input record validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Unknown topic: {topic}")]
    UnknownTopic { topic: String },

    #[error("Missing identifier for {kind}")]
    MissingId { kind: &'static str },

    #[error("Non-finite {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("Negative {field}: {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("Timestamp out of range: {timestamp}")]
    TimestampOutOfRange { timestamp: i64 },

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl From<RecordError> for CoSenseError {
    fn from(err: RecordError) -> Self {
        CoSenseError::InvalidRecord(err.to_string())
    }
}

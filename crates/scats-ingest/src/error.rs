//! Error types for the ingestion pipeline
//!
//! Stream-level failures ([`IngestError`]) end the session and propagate to
//! the process boundary. Item-level sink failures never appear here: they are
//! contained by the batch publisher and reported through its outcome and the
//! audit log.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// A Transis document could not be turned into a structured response
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("<{element}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error(transparent)]
    Timestamp(#[from] scats_common::CommonError),
}

impl ParseError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Failures raised by the byte transport underneath the stream client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("credentials rejected (HTTP {0})")]
    Unauthorized(u16),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("read interrupted: {0}")]
    Read(String),
}

/// Top-level error type for the connector
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Transis authentication failed (HTTP {status}). Check TRANSIS_USERNAME and TRANSIS_PASSWORD.")]
    Authentication { status: u16 },

    #[error("Transis connection failed: {0}")]
    Connection(TransportError),

    #[error("Transis reported an error: {0}")]
    Upstream(String),

    #[error("Failed to parse Transis document: {0}")]
    Parse(#[from] ParseError),

    #[error("{0} attempts to reconnect to Transis were made without success")]
    ReconnectsExhausted(u32),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),

    #[error("Configuration error: {0}. Check your environment variables or config file.")]
    Config(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Map a failure to open the stream into the session-level taxonomy
    pub fn from_connect(err: TransportError) -> Self {
        match err {
            TransportError::Unauthorized(status) => Self::Authentication { status },
            other => Self::Connection(other),
        }
    }
}

/// A whole put-records call failed before any per-item outcome came back
#[derive(Error, Debug, Clone)]
#[error("sink request failed: {0}")]
pub struct SinkError(pub String);

/// Failures talking to the audit-job procedures
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unexpected reply from {procedure}: {reply}")]
    UnexpectedReply {
        procedure: &'static str,
        reply: String,
    },

    #[error("No audit job is open")]
    NoActiveJob,

    #[error("Schema name '{0}' is not a plain SQL identifier")]
    InvalidSchema(String),
}

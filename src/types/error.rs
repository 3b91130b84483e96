//! Error types for cosigner
//!
//! Every failure in the service maps onto one variant here. The HTTP layer
//! only ever shows `public_message()`, never the `Display` text, so internal
//! detail (hash formats, downstream bodies) stays in the logs.

use std::fmt;

use hyper::StatusCode;

/// Stage of the signing pipeline that failed after a correct code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    KeyGeneration,
    Certificate,
    Encryption,
    LoadDocument,
    ExternalSign,
    StoreSigned,
    /// The pipeline as a whole ran out of lease time
    Deadline,
    Finalize,
}

impl PipelineStage {
    /// Message shown to the caller when this stage fails
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::KeyGeneration => "Key gen failed",
            Self::Certificate => "Cert gen failed",
            Self::Encryption => "Encryption failed",
            Self::LoadDocument => "Failed to load original PDF",
            Self::ExternalSign => "PDF signing failed",
            Self::StoreSigned => "Failed to store signed PDF",
            Self::Deadline => "Signing timed out",
            Self::Finalize => "Failed to record signature",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::KeyGeneration => "key generation",
            Self::Certificate => "certificate issuance",
            Self::Encryption => "key encryption",
            Self::LoadDocument => "document fetch",
            Self::ExternalSign => "external signing",
            Self::StoreSigned => "signed document store",
            Self::Deadline => "signing deadline",
            Self::Finalize => "session finalize",
        };
        f.write_str(name)
    }
}

/// Main error type for cosigner operations
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid code. Attempts remaining: {remaining}")]
    InvalidCode { remaining: u32 },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{stage} failed: {detail}")]
    Stage { stage: PipelineStage, detail: String },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("External signer error: {0}")]
    ExternalSigner(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignerError {
    /// Wrap any error as the failure of a pipeline stage
    pub fn at_stage(stage: PipelineStage, err: impl fmt::Display) -> Self {
        Self::Stage {
            stage,
            detail: err.to_string(),
        }
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidCode { .. } | Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Stage { .. }
            | Self::Database(_)
            | Self::Nats(_)
            | Self::Crypto(_)
            | Self::Blob(_)
            | Self::ExternalSigner(_)
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to return to an HTTP caller
    pub fn public_message(&self) -> String {
        match self {
            Self::BadRequest(msg)
            | Self::NotFound(msg)
            | Self::Forbidden(msg)
            | Self::Auth(msg)
            | Self::Conflict(msg) => msg.clone(),
            Self::InvalidCode { .. } => self.to_string(),
            Self::Stage { stage, .. } => stage.public_message().to_string(),
            _ => "Internal error".to_string(),
        }
    }

    /// Whether the same request may succeed if simply retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::Stage { .. } | Self::Database(_) | Self::Nats(_)
        )
    }
}

impl From<std::io::Error> for SignerError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for SignerError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for SignerError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for SignerError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON encode failed: {}", err))
    }
}

impl From<reqwest::Error> for SignerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Internal(format!("HTTP client error: {}", err))
    }
}

impl From<async_nats::Error> for SignerError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SignerError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Task failed: {}", err))
    }
}

/// Result type alias for cosigner operations
pub type Result<T> = std::result::Result<T, SignerError>;

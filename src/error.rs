//! Typed errors for the library layers.
//!
//! Command modules wrap these in `anyhow` with context; the walker and the
//! vector-database handle return them directly so callers can tell a
//! retryable remote failure from a configuration mistake.

use thiserror::Error;

/// A failure talking to the GitHub contents API or decoding its payload.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-success HTTP status.
    #[error("GitHub API returned {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// Connection, TLS or timeout failure.
    #[error("Network error requesting {url}: {message}")]
    Network { url: String, message: String },

    /// File content was not valid base64 or not UTF-8.
    #[error("Failed to decode content of {path}: {reason}")]
    Decode { path: String, reason: String },

    /// The file descriptor carried no `content` field.
    #[error("No content returned for {path}")]
    MissingContent { path: String },

    /// The response body did not have the expected shape.
    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A worker task panicked or was cancelled.
    #[error("Walker task failed: {0}")]
    Task(String),
}

impl FetchError {
    /// Rate limiting, server errors and network failures may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Network { .. } => true,
            _ => false,
        }
    }

    /// Credential failures abort the whole traversal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FetchError::Status {
                status: 401 | 403,
                ..
            } | FetchError::Config(_)
                | FetchError::Task(_)
        )
    }
}

/// Errors surfaced by [`crate::vectordb::VectorDbHandle`] and the
/// [`crate::store::VectorStore`] backends.
#[derive(Debug, Error)]
pub enum VectorDbError {
    /// A required model, credential or setting is missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine rejected the request.
    #[error("Vector database error (code {code}): {message}")]
    Backend { code: i64, message: String },

    #[error("HTTP error talking to vector database: {0}")]
    Http(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Collection not found: {0}")]
    NotFound(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Reranking failed: {0}")]
    Rerank(String),
}

impl VectorDbError {
    pub fn config(msg: impl Into<String>) -> Self {
        VectorDbError::Config(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        VectorDbError::InvalidArgument(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, VectorDbError::Config(_))
    }
}

impl From<reqwest::Error> for VectorDbError {
    fn from(err: reqwest::Error) -> Self {
        VectorDbError::Http(err.to_string())
    }
}

pub type VectorDbResult<T> = std::result::Result<T, VectorDbError>;

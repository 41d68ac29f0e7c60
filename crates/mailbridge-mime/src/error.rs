//! Error types for MIME parsing.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME parsing error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid message header.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Invalid content type.
    #[error("invalid content type: {0}")]
    InvalidContentType(String),

    /// Invalid transfer or header encoding.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Multipart message without a boundary parameter.
    #[error("missing boundary in multipart message")]
    MissingBoundary,

    /// General parse error.
    #[error("parse error: {0}")]
    Parse(String),
}

//! Error types for the IMAP client.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Server returned NO.
    #[error("server returned NO: {0}")]
    No(String),

    /// Server returned BAD.
    #[error("server returned BAD: {0}")]
    Bad(String),

    /// Server sent BYE and is disconnecting.
    #[error("server sent BYE: {0}")]
    Bye(String),

    /// Operation exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Protocol violation or unparseable data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection was lost.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

impl Error {
    /// True if the error is plausibly temporary and worth retrying.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout(_) | Self::ConnectionLost(_)
        )
    }

    /// True if the connection is unusable and must be torn down.
    #[must_use]
    pub const fn is_connection_dead(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::Bye(_) | Self::Timeout(_) | Self::ConnectionLost(_)
        )
    }

    /// True if the server is refusing work because of connection or rate
    /// limits rather than a bad request.
    ///
    /// Gmail phrases this as "Too many simultaneous connections"; Outlook
    /// as "Request is throttled".
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::No(text) | Self::Bye(text) => {
                let lower = text.to_lowercase();
                lower.contains("too many") || lower.contains("throttl") || lower.contains("rate")
            }
            _ => false,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

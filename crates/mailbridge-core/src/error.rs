//! Error taxonomy for the aggregation core.
//!
//! Retry and degradation logic pattern-matches these variants instead of
//! inspecting message strings: transient failures are absorbed by the
//! admission queue, rate limits arm cooldowns, and not-found /
//! not-routable surface directly to the collaborator.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IMAP operation failed.
    #[error("IMAP error: {0}")]
    Imap(#[from] mailbridge_imap::Error),

    /// Message parsing failed.
    #[error("MIME error: {0}")]
    Mime(#[from] mailbridge_mime::Error),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// The address does not route to any known backend.
    #[error("address not routable: {0}")]
    NotRoutable(String),

    /// Message or attachment does not exist.
    #[error("not found")]
    NotFound,

    /// A rate limit is in force for the given number of seconds.
    #[error("rate limited for {0}s")]
    RateLimited(u64),

    /// The service is shutting down.
    #[error("shutting down")]
    Shutdown,

    /// A temporary failure worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl Error {
    /// True when the admission queue should retry the work.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Imap(e) => e.is_recoverable() || e.is_rate_limited(),
            Self::Transient(_) | Self::RateLimited(_) => true,
            _ => false,
        }
    }

    /// True when the failure indicates provider-side throttling.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Imap(e) => e.is_rate_limited(),
            Self::RateLimited(_) => true,
            _ => false,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classes() {
        assert!(Error::Transient("reset".into()).is_retryable());
        assert!(Error::RateLimited(5).is_retryable());
        assert!(!Error::NotFound.is_retryable());
        assert!(!Error::Shutdown.is_retryable());
        assert!(!Error::NotRoutable("x@y".into()).is_retryable());
    }

    #[test]
    fn imap_rate_limit_propagates() {
        let inner = mailbridge_imap::Error::No("Too many simultaneous connections".into());
        let err = Error::from(inner);
        assert!(err.is_rate_limited());
        assert!(err.is_retryable());
    }
}

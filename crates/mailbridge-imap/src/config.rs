//! Connection configuration.

use std::time::Duration;

/// IMAP connection configuration.
///
/// Only implicit TLS on port 993 is supported; the providers this client
/// targets accept nothing else.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port (993 unless overridden).
    pub port: u16,
    /// TCP connect deadline.
    pub connect_timeout: Duration,
    /// LOGIN deadline.
    pub auth_timeout: Duration,
    /// Per-command deadline for everything else.
    pub command_timeout: Duration,
}

impl Config {
    /// Creates a configuration for the given host with default deadlines.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 993,
            connect_timeout: Duration::from_secs(15),
            auth_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(20),
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the connect deadline.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the LOGIN deadline.
    #[must_use]
    pub const fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Sets the per-command deadline.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new("imap.gmail.com");
        assert_eq!(config.host, "imap.gmail.com");
        assert_eq!(config.port, 993);
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
        assert_eq!(config.command_timeout, Duration::from_secs(20));
    }

    #[test]
    fn builder_overrides() {
        let config = Config::new("example.com")
            .port(1993)
            .command_timeout(Duration::from_secs(5));
        assert_eq!(config.port, 1993);
        assert_eq!(config.command_timeout, Duration::from_secs(5));
    }
}

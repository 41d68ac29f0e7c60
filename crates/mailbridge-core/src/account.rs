//! Account registry.
//!
//! Accounts are created once at startup from configuration and are
//! immutable afterwards. Passwords live behind the opaque
//! [`Credentials`] handle, which redacts itself from Debug output and is
//! only readable by the connection layer.

use std::sync::Arc;

use crate::config::{AccountConfig, Settings};
use crate::error::{Error, Result};
use crate::message::Provider;

/// Opaque credential handle.
#[derive(Clone)]
pub struct Credentials {
    secret: Arc<str>,
}

impl Credentials {
    fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret),
        }
    }

    /// The secret itself; connection establishment only.
    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(***)")
    }
}

/// A physical mailbox the core authenticates into.
#[derive(Debug, Clone)]
pub struct Account {
    /// Canonical mailbox address, original casing.
    pub address: String,
    /// Account provider.
    pub provider: Provider,
    /// IMAP server hostname.
    pub imap_host: String,
    /// IMAP server port (993, implicit TLS).
    pub imap_port: u16,
    credentials: Credentials,
}

impl Account {
    /// The address lowercased for comparison.
    #[must_use]
    pub fn normalized_address(&self) -> String {
        self.address.to_lowercase()
    }

    /// The credential handle.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// Registry of configured accounts.
#[derive(Debug, Clone, Default)]
pub struct AccountRegistry {
    accounts: Vec<Arc<Account>>,
}

impl AccountRegistry {
    /// Builds the registry from loaded settings.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate addresses or a provider without an
    /// IMAP host.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::from_configs(&settings.accounts)
    }

    /// Builds the registry from account configs.
    ///
    /// # Errors
    ///
    /// As [`AccountRegistry::from_settings`].
    pub fn from_configs(configs: &[AccountConfig]) -> Result<Self> {
        let mut accounts: Vec<Arc<Account>> = Vec::with_capacity(configs.len());

        for config in configs {
            let host = config.provider.imap_host().ok_or_else(|| {
                Error::Config(format!("{} has no IMAP host", config.provider))
            })?;

            if accounts
                .iter()
                .any(|a| a.address.eq_ignore_ascii_case(&config.address))
            {
                return Err(Error::Config(format!(
                    "duplicate account {}",
                    config.address
                )));
            }

            accounts.push(Arc::new(Account {
                address: config.address.clone(),
                provider: config.provider,
                imap_host: host.to_string(),
                imap_port: 993,
                credentials: Credentials::new(&config.password),
            }));
        }

        Ok(Self { accounts })
    }

    /// All accounts in configuration order.
    #[must_use]
    pub fn accounts(&self) -> &[Arc<Account>] {
        &self.accounts
    }

    /// Looks an account up by address, case-insensitively.
    #[must_use]
    pub fn lookup(&self, address: &str) -> Option<&Arc<Account>> {
        self.accounts
            .iter()
            .find(|a| a.address.eq_ignore_ascii_case(address))
    }

    /// The credential handle for an address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRoutable`] for unknown addresses.
    pub fn credentials_for(&self, address: &str) -> Result<Credentials> {
        self.lookup(address)
            .map(|a| a.credentials.clone())
            .ok_or_else(|| Error::NotRoutable(address.to_string()))
    }
}

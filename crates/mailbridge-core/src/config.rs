//! Environment configuration.
//!
//! Accounts arrive as packed `addr1:pw1:addr2:pw2:...` strings per
//! provider, plus a legacy single-Gmail fallback. The deployment profile
//! selects fetch-window and debounce parameters.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::message::Provider;

/// One configured account before registry construction.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    /// Mailbox address.
    pub address: String,
    /// App password.
    pub password: String,
    /// Account provider (gmail or outlook).
    pub provider: Provider,
}

/// Deployment profile controlling window sizes and debounce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Single-account defaults.
    #[default]
    Standard,
    /// Multi-account fan-out defaults.
    Aggregated,
    /// Minimal-latency profile with a small fetch window.
    UltraFast,
}

impl Profile {
    /// Number of recent messages fetched per backend.
    #[must_use]
    pub const fn fetch_window(self) -> usize {
        match self {
            Self::Standard => 50,
            Self::Aggregated => 100,
            Self::UltraFast => 15,
        }
    }

    /// IDLE event debounce interval.
    #[must_use]
    pub const fn debounce(self) -> Duration {
        match self {
            Self::Standard | Self::Aggregated => Duration::from_secs(3),
            Self::UltraFast => Duration::from_millis(500),
        }
    }

    /// Admission queue concurrency bound per backend.
    #[must_use]
    pub const fn max_concurrent(self) -> usize {
        match self {
            Self::Standard | Self::UltraFast => 3,
            Self::Aggregated => 5,
        }
    }

    /// Admission queue per-second dispatch ceiling per backend.
    #[must_use]
    pub const fn max_per_second(self) -> usize {
        match self {
            Self::Standard | Self::UltraFast => 5,
            Self::Aggregated => 8,
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "aggregated" => Ok(Self::Aggregated),
            "ultra-fast" | "ultrafast" => Ok(Self::UltraFast),
            other => Err(Error::Config(format!("unknown profile {other:?}"))),
        }
    }
}

/// Loaded configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Configured accounts.
    pub accounts: Vec<AccountConfig>,
    /// Deployment profile.
    pub profile: Profile,
}

impl Settings {
    /// Loads configuration from the environment.
    ///
    /// Reads `GMAIL_ACCOUNTS`, `OUTLOOK_ACCOUNTS`, the legacy
    /// `EMAIL_USER`/`EMAIL_PASSWORD` pair, and `MAILBRIDGE_PROFILE`.
    /// When no profile is named, multi-account deployments default to
    /// `Aggregated`.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed account strings, an unknown
    /// profile, or an empty account set.
    pub fn from_env() -> Result<Self> {
        let mut accounts = Vec::new();

        if let Ok(raw) = std::env::var("GMAIL_ACCOUNTS") {
            accounts.extend(parse_packed(&raw, Provider::Gmail)?);
        }
        if let Ok(raw) = std::env::var("OUTLOOK_ACCOUNTS") {
            accounts.extend(parse_packed(&raw, Provider::Outlook)?);
        }

        // Legacy single-Gmail form; ignored when the address is already
        // present in the packed variables.
        if let (Ok(user), Ok(password)) =
            (std::env::var("EMAIL_USER"), std::env::var("EMAIL_PASSWORD"))
            && !accounts
                .iter()
                .any(|a| a.address.eq_ignore_ascii_case(&user))
        {
            accounts.push(validated(&user, &password, Provider::Gmail)?);
        }

        if accounts.is_empty() {
            return Err(Error::Config(
                "no accounts configured; set GMAIL_ACCOUNTS, OUTLOOK_ACCOUNTS, \
                 or EMAIL_USER/EMAIL_PASSWORD"
                    .to_string(),
            ));
        }

        let profile = match std::env::var("MAILBRIDGE_PROFILE") {
            Ok(raw) => Profile::parse(&raw)?,
            Err(_) if accounts.len() > 1 => Profile::Aggregated,
            Err(_) => Profile::Standard,
        };

        Ok(Self { accounts, profile })
    }
}

/// Parses one `addr1:pw1:addr2:pw2:...` packed string.
pub fn parse_packed(raw: &str, provider: Provider) -> Result<Vec<AccountConfig>> {
    let fields: Vec<&str> = raw
        .split(':')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();

    if fields.is_empty() {
        return Ok(Vec::new());
    }
    if fields.len() % 2 != 0 {
        return Err(Error::Config(format!(
            "{provider} accounts: expected address:password pairs, got {} fields",
            fields.len()
        )));
    }

    fields
        .chunks_exact(2)
        .map(|pair| validated(pair[0], pair[1], provider))
        .collect()
}

fn validated(address: &str, password: &str, provider: Provider) -> Result<AccountConfig> {
    if !address.contains('@') {
        return Err(Error::Config(format!(
            "invalid account address {address:?}"
        )));
    }
    if provider.imap_host().is_none() {
        return Err(Error::Config(format!("{provider} is not an account provider")));
    }

    Ok(AccountConfig {
        address: address.to_string(),
        password: password.to_string(),
        provider,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn packed_pairs() {
        let accounts =
            parse_packed("a@gmail.com:pw1:b@gmail.com:pw2", Provider::Gmail).unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].address, "a@gmail.com");
        assert_eq!(accounts[1].password, "pw2");
    }

    #[test]
    fn packed_single() {
        let accounts = parse_packed("a@outlook.com:pw", Provider::Outlook).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].provider, Provider::Outlook);
    }

    #[test]
    fn odd_field_count_rejected() {
        assert!(parse_packed("a@gmail.com:pw:dangling", Provider::Gmail).is_err());
    }

    #[test]
    fn address_without_at_rejected() {
        assert!(parse_packed("nonsense:pw", Provider::Gmail).is_err());
    }

    #[test]
    fn empty_string_is_no_accounts() {
        assert!(parse_packed("", Provider::Gmail).unwrap().is_empty());
    }

    #[test]
    fn domain_is_not_an_account_provider() {
        assert!(validated("a@b.com", "pw", Provider::Domain).is_err());
    }

    #[test]
    fn profile_parameters() {
        assert_eq!(Profile::Standard.fetch_window(), 50);
        assert_eq!(Profile::Aggregated.fetch_window(), 100);
        assert_eq!(Profile::UltraFast.fetch_window(), 15);
        assert_eq!(Profile::UltraFast.debounce(), Duration::from_millis(500));
        assert_eq!(Profile::Aggregated.max_concurrent(), 5);
    }

    #[test]
    fn profile_names() {
        assert_eq!(Profile::parse("aggregated").unwrap(), Profile::Aggregated);
        assert_eq!(Profile::parse("Ultra-Fast").unwrap(), Profile::UltraFast);
        assert!(Profile::parse("turbo").is_err());
    }
}

//! Alias generation and recipient routing.
//!
//! Two alias families exist: plus-suffix (`local+tag@domain`, Gmail and
//! Outlook/Hotmail) and Gmail dot-variants (Gmail ignores dots in the
//! local part). Routing inverts both: given an arbitrary recipient it
//! decides which configured backend actually holds the mail.

use rand::Rng;

use crate::account::Account;
use crate::error::{Error, Result};
use crate::message::Provider;

/// A generated alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    /// The user-facing address.
    pub alias_address: String,
    /// The backend it routes to.
    pub base_address: String,
    /// The backend's provider.
    pub provider: Provider,
    /// The plus suffix, when the plus family was used.
    pub suffix: Option<String>,
}

/// Catch-all configuration: one backend receiving every local-part under
/// the listed domains.
#[derive(Debug, Clone)]
pub struct CatchAll {
    /// The mailbox all domain mail lands in.
    pub backend: String,
    /// Domains served, lowercased.
    pub domains: Vec<String>,
}

impl CatchAll {
    /// Creates a catch-all config, normalizing the domain list.
    #[must_use]
    pub fn new(backend: impl Into<String>, domains: &[&str]) -> Self {
        Self {
            backend: backend.into(),
            domains: domains.iter().map(|d| d.to_lowercase()).collect(),
        }
    }
}

/// Where a recipient's mail physically lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Backend mailbox address (canonical casing from configuration).
    pub backend: String,
    /// Routing classification for messages on this route.
    pub provider: Provider,
    /// True when the recipient is not the backend's own address.
    pub is_alias: bool,
}

/// Maps recipients onto configured backends.
#[derive(Debug, Clone, Default)]
pub struct Router {
    backends: Vec<BackendKey>,
    catchall: Option<CatchAll>,
}

#[derive(Debug, Clone)]
struct BackendKey {
    address: String,
    local: String,
    domain: String,
    provider: Provider,
}

impl Router {
    /// Builds a router over the given accounts and optional catch-all.
    #[must_use]
    pub fn new(accounts: &[std::sync::Arc<Account>], catchall: Option<CatchAll>) -> Self {
        let backends = accounts
            .iter()
            .filter_map(|account| {
                let normalized = account.normalized_address();
                let (local, domain) = normalized.split_once('@')?;
                Some(BackendKey {
                    address: account.address.clone(),
                    local: local.to_string(),
                    domain: domain.to_string(),
                    provider: account.provider,
                })
            })
            .collect();

        Self { backends, catchall }
    }

    /// Routes a recipient to a backend.
    ///
    /// Catch-all domains are checked first, then Gmail dot/plus
    /// equivalence, then Outlook plus equivalence. Returns `None` when no
    /// backend can hold the recipient's mail.
    #[must_use]
    pub fn route(&self, recipient: &str) -> Option<Route> {
        let normalized = recipient.to_lowercase();
        let (local, domain) = normalized.split_once('@')?;
        if local.is_empty() || domain.is_empty() {
            return None;
        }

        if let Some(catchall) = &self.catchall
            && catchall.domains.iter().any(|d| d == domain)
        {
            return Some(Route {
                backend: catchall.backend.clone(),
                provider: Provider::Domain,
                is_alias: normalized != catchall.backend.to_lowercase(),
            });
        }

        let bare_local = local.split('+').next().unwrap_or(local);

        for backend in &self.backends {
            if backend.domain != domain {
                continue;
            }
            let matched = match backend.provider {
                // Gmail ignores dots; compare dot-stripped locals.
                Provider::Gmail => {
                    strip_dots(bare_local) == strip_dots(&backend.local)
                }
                Provider::Outlook => bare_local == backend.local,
                Provider::Domain => false,
            };
            if matched {
                return Some(Route {
                    backend: backend.address.clone(),
                    provider: backend.provider,
                    is_alias: normalized != backend.address.to_lowercase(),
                });
            }
        }

        None
    }

    /// True when the recipient is an alias: it carries a plus tag or
    /// routes to a backend other than itself.
    #[must_use]
    pub fn is_alias(&self, recipient: &str) -> bool {
        if recipient.contains('+') {
            return true;
        }
        self.route(recipient).is_some_and(|r| r.is_alias)
    }
}

/// Generates a plus-suffix alias for a backend address.
///
/// The suffix must match `[a-z0-9_]{2,}` when supplied; otherwise six
/// random lowercase alphanumerics are used.
///
/// # Errors
///
/// Returns an error for a malformed base address or invalid suffix.
pub fn generate_plus_alias(
    base_address: &str,
    provider: Provider,
    suffix: Option<&str>,
) -> Result<Alias> {
    let base = base_address.to_lowercase();
    let (local, domain) = base
        .split_once('@')
        .ok_or_else(|| Error::NotRoutable(base_address.to_string()))?;

    let suffix = match suffix {
        Some(s) if is_valid_suffix(s) => s.to_string(),
        Some(s) => {
            return Err(Error::Config(format!(
                "invalid alias suffix {s:?}: expected [a-z0-9_]{{2,}}"
            )));
        }
        None => random_suffix(),
    };

    Ok(Alias {
        alias_address: format!("{local}+{suffix}@{domain}"),
        base_address: base,
        provider,
        suffix: Some(suffix),
    })
}

/// Generates a Gmail dot-variant alias.
///
/// Strips every dot from the local part and re-inserts exactly one at a
/// random interior position. Locals too short for an interior dot fall
/// back to a plus alias.
///
/// # Errors
///
/// Returns an error for a malformed base address.
pub fn generate_dot_alias(base_address: &str) -> Result<Alias> {
    let base = base_address.to_lowercase();
    let (local, domain) = base
        .split_once('@')
        .ok_or_else(|| Error::NotRoutable(base_address.to_string()))?;

    let stripped = strip_dots(local);
    if stripped.len() < 2 {
        return generate_plus_alias(base_address, Provider::Gmail, None);
    }

    let position = rand::thread_rng().gen_range(1..stripped.len());
    let mut dotted = stripped;
    dotted.insert(position, '.');

    Ok(Alias {
        alias_address: format!("{dotted}@{domain}"),
        base_address: base,
        provider: Provider::Gmail,
        suffix: None,
    })
}

fn strip_dots(local: &str) -> String {
    local.chars().filter(|&c| c != '.').collect()
}

fn is_valid_suffix(s: &str) -> bool {
    s.len() >= 2
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::account::AccountRegistry;
    use crate::config::AccountConfig;

    fn router() -> Router {
        let registry = AccountRegistry::from_configs(&[
            AccountConfig {
                address: "alice@gmail.com".into(),
                password: "pw".into(),
                provider: Provider::Gmail,
            },
            AccountConfig {
                address: "john.doe@gmail.com".into(),
                password: "pw".into(),
                provider: Provider::Gmail,
            },
            AccountConfig {
                address: "bob@outlook.com".into(),
                password: "pw".into(),
                provider: Provider::Outlook,
            },
        ])
        .unwrap();
        Router::new(registry.accounts(), None)
    }

    #[test]
    fn plus_alias_routes_back_to_base() {
        let alias =
            generate_plus_alias("alice@gmail.com", Provider::Gmail, Some("shop")).unwrap();
        assert_eq!(alias.alias_address, "alice+shop@gmail.com");

        let route = router().route(&alias.alias_address).unwrap();
        assert_eq!(route.backend, "alice@gmail.com");
        assert!(route.is_alias);
    }

    #[test]
    fn random_plus_alias_round_trip() {
        for _ in 0..20 {
            let alias = generate_plus_alias("alice@gmail.com", Provider::Gmail, None).unwrap();
            let route = router().route(&alias.alias_address).unwrap();
            assert_eq!(route.backend, "alice@gmail.com");
            assert!(route.is_alias);
        }
    }

    #[test]
    fn dot_alias_round_trip() {
        // Non-idempotent generator: assert routing equivalence only.
        for _ in 0..20 {
            let alias = generate_dot_alias("john.doe@gmail.com").unwrap();
            let route = router().route(&alias.alias_address).unwrap();
            assert_eq!(route.backend, "john.doe@gmail.com");
        }
    }

    #[test]
    fn heavily_dotted_recipient_routes() {
        let route = router().route("j.o.h.n.d.o.e@gmail.com").unwrap();
        assert_eq!(route.backend, "john.doe@gmail.com");
        assert!(route.is_alias);
    }

    #[test]
    fn exact_backend_is_not_alias() {
        let route = router().route("Alice@Gmail.com").unwrap();
        assert_eq!(route.backend, "alice@gmail.com");
        assert!(!route.is_alias);
        assert!(!router().is_alias("alice@gmail.com"));
    }

    #[test]
    fn outlook_plus_routes() {
        let alias =
            generate_plus_alias("bob@outlook.com", Provider::Outlook, Some("news_1")).unwrap();
        assert_eq!(alias.alias_address, "bob+news_1@outlook.com");
        let route = router().route("bob+news_1@outlook.com").unwrap();
        assert_eq!(route.backend, "bob@outlook.com");
        assert!(route.is_alias);
    }

    #[test]
    fn outlook_does_not_ignore_dots() {
        assert!(router().route("b.ob@outlook.com").is_none());
    }

    #[test]
    fn wrong_domain_is_not_routable() {
        assert!(router().route("alice@hotmail.com").is_none());
        assert!(router().route("stranger@gmail.com").is_none());
        assert!(router().route("not-an-address").is_none());
    }

    #[test]
    fn invalid_suffix_rejected() {
        assert!(generate_plus_alias("a@gmail.com", Provider::Gmail, Some("X")).is_err());
        assert!(generate_plus_alias("a@gmail.com", Provider::Gmail, Some("has space")).is_err());
        assert!(generate_plus_alias("a@gmail.com", Provider::Gmail, Some("UPPER")).is_err());
    }

    #[test]
    fn short_local_falls_back_to_plus() {
        let alias = generate_dot_alias("a@gmail.com").unwrap();
        assert!(alias.alias_address.contains('+'));
        assert!(alias.suffix.is_some());
    }

    #[test]
    fn catchall_routes_any_local_part() {
        let registry = AccountRegistry::from_configs(&[AccountConfig {
            address: "catch@example.com".into(),
            password: "pw".into(),
            provider: Provider::Gmail,
        }])
        .unwrap();
        let router = Router::new(
            registry.accounts(),
            Some(CatchAll::new("catch@example.com", &["d1.test", "d2.test"])),
        );

        let route = router.route("anything@d1.test").unwrap();
        assert_eq!(route.backend, "catch@example.com");
        assert_eq!(route.provider, Provider::Domain);
        assert!(route.is_alias);

        assert!(router.route("anything@d3.test").is_none());
    }

    #[test]
    fn plus_tagged_address_is_always_alias() {
        assert!(router().is_alias("whoever+tag@nowhere.test"));
    }
}

//! Address header parsing.
//!
//! Handles the forms that actually occur in From/To headers:
//! `addr@host`, `<addr@host>`, `Display Name <addr@host>`,
//! `"Quoted, Name" <addr@host>`, and comma-separated lists thereof.

use crate::encoding::decode_header;

/// A parsed mailbox: optional display name plus the address itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name, RFC 2047 decoded, without surrounding quotes.
    pub name: Option<String>,
    /// The bare address, original casing preserved.
    pub address: String,
}

impl Mailbox {
    /// The address lowercased for comparison.
    #[must_use]
    pub fn normalized(&self) -> String {
        self.address.to_lowercase()
    }
}

/// Parses the first mailbox from a header value.
#[must_use]
pub fn parse_address(value: &str) -> Option<Mailbox> {
    parse_address_list(value).into_iter().next()
}

/// Parses a comma-separated mailbox list.
///
/// Commas inside quoted display names do not split entries. Entries that
/// contain no `@` are dropped.
#[must_use]
pub fn parse_address_list(value: &str) -> Vec<Mailbox> {
    split_outside_quotes(value)
        .into_iter()
        .filter_map(|entry| parse_single(entry.trim()))
        .collect()
}

fn parse_single(entry: &str) -> Option<Mailbox> {
    if entry.is_empty() {
        return None;
    }

    if let Some(open) = entry.rfind('<') {
        let close = entry[open..].find('>').map(|i| open + i)?;
        let address = entry[open + 1..close].trim();
        if !address.contains('@') {
            return None;
        }
        let raw_name = entry[..open].trim().trim_matches('"').trim();
        let name = if raw_name.is_empty() {
            None
        } else {
            Some(decode_header(raw_name))
        };
        return Some(Mailbox {
            name,
            address: address.to_string(),
        });
    }

    let bare = entry.trim();
    if !bare.contains('@') {
        return None;
    }
    Some(Mailbox {
        name: None,
        address: bare.to_string(),
    })
}

fn split_outside_quotes(value: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                entries.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&value[start..]);
    entries
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bare_address() {
        let mb = parse_address("alice@example.com").unwrap();
        assert_eq!(mb.address, "alice@example.com");
        assert!(mb.name.is_none());
    }

    #[test]
    fn angle_only() {
        let mb = parse_address("<alice@example.com>").unwrap();
        assert_eq!(mb.address, "alice@example.com");
        assert!(mb.name.is_none());
    }

    #[test]
    fn display_name() {
        let mb = parse_address("Alice Smith <alice@example.com>").unwrap();
        assert_eq!(mb.name.as_deref(), Some("Alice Smith"));
        assert_eq!(mb.address, "alice@example.com");
    }

    #[test]
    fn quoted_name_with_comma() {
        let list = parse_address_list(r#""Smith, Alice" <alice@example.com>, bob@example.com"#);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name.as_deref(), Some("Smith, Alice"));
        assert_eq!(list[1].address, "bob@example.com");
    }

    #[test]
    fn encoded_display_name() {
        let mb = parse_address("=?utf-8?B?Sm9zw6k=?= <jose@example.com>").unwrap();
        assert_eq!(mb.name.as_deref(), Some("José"));
    }

    #[test]
    fn normalized_lowercases() {
        let mb = parse_address("Alice <ALICE@Example.COM>").unwrap();
        assert_eq!(mb.normalized(), "alice@example.com");
        assert_eq!(mb.address, "ALICE@Example.COM");
    }

    #[test]
    fn garbage_dropped() {
        assert!(parse_address("undisclosed-recipients:;").is_none());
        assert!(parse_address_list("a@b.com, not-an-address").len() == 1);
    }
}

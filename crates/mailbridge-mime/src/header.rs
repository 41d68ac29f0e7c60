//! RFC 5322 header parsing.

use std::collections::HashMap;

use crate::encoding::decode_header;

/// Collection of message headers.
///
/// Names are case-insensitive; multiple values per name are preserved in
/// arrival order. Values are stored raw; use [`Headers::get_decoded`] for
/// RFC 2047 decoding.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: HashMap<String, Vec<String>>,
}

impl Headers {
    /// Creates an empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        self.headers.entry(name).or_default().push(value.into());
    }

    /// Gets the first raw value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first().map(String::as_str))
    }

    /// Gets the first value for a header with RFC 2047 words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_header)
    }

    /// Gets all raw values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get(&name.to_lowercase())
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns true when no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Parses a raw header block.
    ///
    /// Handles folded continuation lines (leading space or tab). Lines
    /// without a colon are skipped; parsing stops at the first empty line.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value);
            }

            if let Some((name, value)) = line.split_once(':') {
                current = Some((name.trim().to_string(), value.trim().to_string()));
            }
        }

        if let Some((name, value)) = current {
            headers.add(name, value);
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_headers() {
        let text = "From: a@example.com\r\nTo: b@example.com\r\nSubject: Hi\r\n";
        let headers = Headers::parse(text);
        assert_eq!(headers.get("from"), Some("a@example.com"));
        assert_eq!(headers.get("To"), Some("b@example.com"));
        assert_eq!(headers.get("SUBJECT"), Some("Hi"));
    }

    #[test]
    fn parse_folded_header() {
        let text = "Subject: a very\r\n long subject\r\n";
        let headers = Headers::parse(text);
        assert_eq!(headers.get("subject"), Some("a very long subject"));
    }

    #[test]
    fn parse_stops_at_blank_line() {
        let text = "Subject: one\r\n\r\nNot-A-Header: body text\r\n";
        let headers = Headers::parse(text);
        assert_eq!(headers.get("subject"), Some("one"));
        assert!(headers.get("not-a-header").is_none());
    }

    #[test]
    fn duplicate_headers_preserved() {
        let text = "Received: hop1\r\nReceived: hop2\r\n";
        let headers = Headers::parse(text);
        assert_eq!(headers.get_all("received"), vec!["hop1", "hop2"]);
    }

    #[test]
    fn decoded_value() {
        let text = "Subject: =?utf-8?B?SMOpbGxv?=\r\n";
        let headers = Headers::parse(text);
        assert_eq!(headers.get_decoded("subject").as_deref(), Some("Héllo"));
    }
}

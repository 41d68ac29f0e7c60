//! Canonical message model.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which kind of mailbox a message was routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// A Gmail mailbox.
    Gmail,
    /// An Outlook / Hotmail mailbox.
    Outlook,
    /// A catch-all domain route backed by one of the above.
    Domain,
}

impl Provider {
    /// IMAP host for accounts of this provider.
    ///
    /// `Domain` is a routing classification, not an account provider, and
    /// has no host of its own.
    #[must_use]
    pub const fn imap_host(self) -> Option<&'static str> {
        match self {
            Self::Gmail => Some("imap.gmail.com"),
            Self::Outlook => Some("outlook.office365.com"),
            Self::Domain => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gmail => write!(f, "gmail"),
            Self::Outlook => write!(f, "outlook"),
            Self::Domain => write!(f, "domain"),
        }
    }
}

/// Per-request identity injected by the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Viewer {
    /// No session; sees alias traffic only on provider routes.
    Anonymous,
    /// Signed-in user; may also see a backend's own mail.
    Authenticated,
}

/// Attachment metadata carried on a [`Message`].
///
/// Raw bytes live in the payload cache, never on the message record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInfo {
    /// Attachment filename.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Decoded size in bytes.
    pub size_bytes: usize,
}

/// The canonical normalized message record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Stable id: the RFC 5322 Message-Id, else `uid-<backend>-<uid>`.
    pub id: String,
    /// IMAP UID within the backend mailbox.
    pub uid: u32,
    /// Sender address, original casing.
    pub from: String,
    /// Sender display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    /// First recipient address, original casing.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Message date, UTC.
    pub date: DateTime<Utc>,
    /// Plain text body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    /// HTML body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    /// Attachment metadata, in message order.
    pub attachments: Vec<AttachmentInfo>,
    /// Physical mailbox holding the bytes; the routing key.
    pub backend: String,
    /// Routing classification.
    pub provider: Provider,
    /// True when `to` is not the backend's own address.
    pub is_alias: bool,
}

impl Message {
    /// The recipient lowercased for comparison.
    #[must_use]
    pub fn normalized_to(&self) -> String {
        self.to.to_lowercase()
    }

    /// Builds the fallback id for a message without a Message-Id header.
    #[must_use]
    pub fn fallback_id(backend: &str, uid: u32) -> String {
        format!("uid-{backend}-{uid}")
    }
}

/// An attachment with its decoded bytes, held only in the payload cache.
#[derive(Debug, Clone)]
pub struct AttachmentData {
    /// Attachment filename.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Decoded bytes.
    pub data: Vec<u8>,
}

/// Parsed payload retained for attachment serving.
#[derive(Debug, Clone, Default)]
pub struct MessagePayload {
    /// Attachments with raw bytes.
    pub attachments: Vec<AttachmentData>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let message = Message {
            id: "m1@example.com".into(),
            uid: 7,
            from: "Sender@example.com".into(),
            from_name: Some("Sender".into()),
            to: "alice+shop@gmail.com".into(),
            subject: "hi".into(),
            date: DateTime::parse_from_rfc3339("2026-07-06T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            text_body: Some("body".into()),
            html_body: None,
            attachments: vec![AttachmentInfo {
                filename: "a.pdf".into(),
                content_type: "application/pdf".into(),
                size_bytes: 5,
            }],
            backend: "alice@gmail.com".into(),
            provider: Provider::Gmail,
            is_alias: true,
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["isAlias"], true);
        assert_eq!(json["provider"], "gmail");
        assert_eq!(json["attachments"][0]["sizeBytes"], 5);
        assert_eq!(json["date"], "2026-07-06T10:00:00Z");
        assert!(json.get("htmlBody").is_none());
    }

    #[test]
    fn fallback_id_shape() {
        assert_eq!(
            Message::fallback_id("alice@gmail.com", 42),
            "uid-alice@gmail.com-42"
        );
    }
}

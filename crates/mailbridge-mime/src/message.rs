//! Message structure and multipart traversal.

use crate::address::{Mailbox, parse_address, parse_address_list};
use crate::content_type::ContentType;
use crate::encoding::{decode_base64, decode_charset, decode_header, decode_quoted_printable};
use crate::error::Result;
use crate::header::Headers;

/// Transfer encoding of a body or part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII (the default).
    SevenBit,
    /// 8-bit text.
    EightBit,
    /// Base64.
    Base64,
    /// Quoted-Printable.
    QuotedPrintable,
    /// Raw binary.
    Binary,
}

impl TransferEncoding {
    /// Parses a Content-Transfer-Encoding value.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

/// A single MIME part: headers plus raw (still encoded) body bytes.
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Raw body bytes before transfer decoding.
    pub body: Vec<u8>,
}

impl Part {
    /// The part's content type, defaulting to `text/plain`.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .and_then(|v| ContentType::parse(v).ok())
            .unwrap_or_else(ContentType::text_plain)
    }

    /// The part's transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Decodes the body according to the transfer encoding.
    #[must_use]
    pub fn decode_body(&self) -> Vec<u8> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => {
                decode_base64(&String::from_utf8_lossy(&self.body)).unwrap_or_default()
            }
            TransferEncoding::QuotedPrintable => decode_quoted_printable(&self.body),
            _ => self.body.clone(),
        }
    }

    /// Decodes the body to text using the declared charset.
    #[must_use]
    pub fn decode_text(&self) -> String {
        let bytes = self.decode_body();
        let ct = self.content_type();
        decode_charset(ct.charset().unwrap_or("utf-8"), &bytes)
    }

    /// Attachment filename, from Content-Disposition or the name parameter.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        if let Some(disposition) = self.headers.get("content-disposition")
            && let Some(name) = disposition_param(disposition, "filename")
        {
            return Some(decode_header(&name));
        }
        self.content_type().name().map(decode_header)
    }

    /// True when this part should be treated as an attachment.
    ///
    /// Attachment disposition always wins; otherwise any non-multipart part
    /// carrying a filename counts.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        if let Some(disposition) = self.headers.get("content-disposition") {
            let kind = disposition
                .split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_lowercase();
            if kind == "attachment" {
                return true;
            }
        }
        !self.content_type().is_multipart() && self.filename().is_some()
    }
}

/// An attachment lifted out of a parsed message.
#[derive(Debug, Clone)]
pub struct AttachmentPart {
    /// Filename; a placeholder is synthesized when the part named none.
    pub filename: String,
    /// Content type, e.g. `application/pdf`.
    pub content_type: String,
    /// Decoded bytes.
    pub data: Vec<u8>,
}

/// A fully parsed message.
#[derive(Debug, Clone, Default)]
pub struct ParsedMail {
    /// Top-level headers.
    pub headers: Headers,
    /// First From mailbox.
    pub from: Option<Mailbox>,
    /// To mailboxes, in header order.
    pub to: Vec<Mailbox>,
    /// Subject, RFC 2047 decoded.
    pub subject: Option<String>,
    /// Raw Date header value (RFC 2822 date; parsing is the caller's).
    pub date: Option<String>,
    /// Message-Id with angle brackets stripped.
    pub message_id: Option<String>,
    /// First text/plain body.
    pub text_body: Option<String>,
    /// First text/html body.
    pub html_body: Option<String>,
    /// Attachments with decoded bytes.
    pub attachments: Vec<AttachmentPart>,
}

impl ParsedMail {
    /// Parses raw RFC 5322 message bytes.
    ///
    /// Multipart messages are walked recursively; the first `text/plain`
    /// and `text/html` leaves become the bodies and attachment parts are
    /// collected with their decoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the header block cannot be split from the
    /// body. Defective sub-parts are skipped rather than failing the whole
    /// message.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let (header_bytes, body) = split_message(raw);
        let header_text = String::from_utf8_lossy(header_bytes);
        let headers = Headers::parse(&header_text);

        let mut mail = Self {
            from: headers.get("from").and_then(parse_address),
            to: headers.get("to").map(parse_address_list).unwrap_or_default(),
            subject: headers.get_decoded("subject"),
            date: headers.get("date").map(str::to_string),
            message_id: headers
                .get("message-id")
                .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string()),
            headers,
            ..Self::default()
        };

        let root = Part {
            headers: mail.headers.clone(),
            body: body.to_vec(),
        };
        mail.walk(&root, 0);

        Ok(mail)
    }

    /// Recursively collects bodies and attachments from a part tree.
    fn walk(&mut self, part: &Part, depth: usize) {
        // Guard against adversarial nesting.
        if depth > 8 {
            return;
        }

        let ct = part.content_type();

        if ct.is_multipart() {
            let Some(boundary) = ct.boundary() else {
                return;
            };
            for sub in split_multipart(&part.body, boundary) {
                self.walk(&sub, depth + 1);
            }
            return;
        }

        if part.is_attachment() {
            let filename = part
                .filename()
                .unwrap_or_else(|| format!("attachment-{}", self.attachments.len() + 1));
            self.attachments.push(AttachmentPart {
                filename,
                content_type: ct.to_string(),
                data: part.decode_body(),
            });
            return;
        }

        if ct.is("text", "plain") && self.text_body.is_none() {
            self.text_body = Some(part.decode_text());
        } else if ct.is("text", "html") && self.html_body.is_none() {
            self.html_body = Some(part.decode_text());
        }
    }
}

/// Splits raw bytes into the header block and the body.
fn split_message(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find_subslice(raw, b"\r\n\r\n") {
        (&raw[..pos], &raw[pos + 4..])
    } else if let Some(pos) = find_subslice(raw, b"\n\n") {
        (&raw[..pos], &raw[pos + 2..])
    } else {
        (raw, &[])
    }
}

/// Splits a multipart body into its parts.
fn split_multipart(body: &[u8], boundary: &str) -> Vec<Part> {
    let delimiter = format!("--{boundary}");
    let text = String::from_utf8_lossy(body);
    let mut parts = Vec::new();

    for chunk in text.split(delimiter.as_str()).skip(1) {
        // The closing delimiter leaves "--" (plus trailing CRLF).
        if chunk.starts_with("--") {
            break;
        }
        let chunk = chunk.trim_start_matches("\r\n").trim_start_matches('\n');
        let (header_bytes, part_body) = split_message(chunk.as_bytes());
        let headers = Headers::parse(&String::from_utf8_lossy(header_bytes));
        // Drop the CRLF that belongs to the next delimiter line.
        let part_body = strip_trailing_crlf(part_body);
        parts.push(Part {
            headers,
            body: part_body.to_vec(),
        });
    }

    parts
}

fn strip_trailing_crlf(body: &[u8]) -> &[u8] {
    if body.ends_with(b"\r\n") {
        &body[..body.len() - 2]
    } else if body.ends_with(b"\n") {
        &body[..body.len() - 1]
    } else {
        body
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn disposition_param(disposition: &str, key: &str) -> Option<String> {
    for param in disposition.split(';').skip(1) {
        if let Some((name, value)) = param.trim().split_once('=')
            && name.trim().eq_ignore_ascii_case(key)
        {
            return Some(value.trim().trim_matches('"').to_string());
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn crlf(text: &str) -> Vec<u8> {
        text.replace('\n', "\r\n").into_bytes()
    }

    #[test]
    fn single_part_plain() {
        let raw = crlf(
            "From: Alice <alice@example.com>\n\
             To: bob@example.com\n\
             Subject: Hi\n\
             Date: Mon, 6 Jul 2026 10:00:00 +0000\n\
             Message-Id: <m1@example.com>\n\
             Content-Type: text/plain; charset=utf-8\n\
             \n\
             Hello Bob",
        );

        let mail = ParsedMail::parse(&raw).unwrap();
        assert_eq!(mail.from.as_ref().unwrap().address, "alice@example.com");
        assert_eq!(mail.from.as_ref().unwrap().name.as_deref(), Some("Alice"));
        assert_eq!(mail.to[0].address, "bob@example.com");
        assert_eq!(mail.subject.as_deref(), Some("Hi"));
        assert_eq!(mail.message_id.as_deref(), Some("m1@example.com"));
        assert_eq!(mail.text_body.as_deref(), Some("Hello Bob"));
        assert!(mail.html_body.is_none());
        assert!(mail.attachments.is_empty());
    }

    #[test]
    fn multipart_alternative() {
        let raw = crlf(
            "From: a@example.com\n\
             To: b@example.com\n\
             Content-Type: multipart/alternative; boundary=XYZ\n\
             \n\
             --XYZ\n\
             Content-Type: text/plain\n\
             \n\
             plain body\n\
             --XYZ\n\
             Content-Type: text/html\n\
             \n\
             <p>html body</p>\n\
             --XYZ--\n",
        );

        let mail = ParsedMail::parse(&raw).unwrap();
        assert_eq!(mail.text_body.as_deref(), Some("plain body"));
        assert_eq!(mail.html_body.as_deref(), Some("<p>html body</p>"));
    }

    #[test]
    fn nested_multipart_with_attachment() {
        let raw = crlf(
            "From: a@example.com\n\
             To: b@example.com\n\
             Content-Type: multipart/mixed; boundary=outer\n\
             \n\
             --outer\n\
             Content-Type: multipart/alternative; boundary=inner\n\
             \n\
             --inner\n\
             Content-Type: text/plain\n\
             \n\
             the text\n\
             --inner--\n\
             --outer\n\
             Content-Type: application/pdf; name=\"doc.pdf\"\n\
             Content-Disposition: attachment; filename=\"doc.pdf\"\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             JVBERi0=\n\
             --outer--\n",
        );

        let mail = ParsedMail::parse(&raw).unwrap();
        assert_eq!(mail.text_body.as_deref(), Some("the text"));
        assert_eq!(mail.attachments.len(), 1);
        assert_eq!(mail.attachments[0].filename, "doc.pdf");
        assert_eq!(mail.attachments[0].content_type, "application/pdf");
        assert_eq!(mail.attachments[0].data, b"%PDF-");
    }

    #[test]
    fn quoted_printable_body() {
        let raw = crlf(
            "From: a@example.com\n\
             Content-Type: text/plain; charset=utf-8\n\
             Content-Transfer-Encoding: quoted-printable\n\
             \n\
             caf=C3=A9",
        );

        let mail = ParsedMail::parse(&raw).unwrap();
        assert_eq!(mail.text_body.as_deref(), Some("café"));
    }

    #[test]
    fn inline_image_without_filename_is_not_body() {
        let raw = crlf(
            "Content-Type: multipart/mixed; boundary=B\n\
             \n\
             --B\n\
             Content-Type: text/plain\n\
             \n\
             body\n\
             --B\n\
             Content-Type: image/png; name=\"pixel.png\"\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             iVBORw0=\n\
             --B--\n",
        );

        let mail = ParsedMail::parse(&raw).unwrap();
        assert_eq!(mail.attachments.len(), 1);
        assert_eq!(mail.attachments[0].filename, "pixel.png");
        assert_eq!(mail.attachments[0].content_type, "image/png");
    }

    #[test]
    fn headers_only_message() {
        let raw = b"Subject: bare\r\n".to_vec();
        let mail = ParsedMail::parse(&raw).unwrap();
        assert_eq!(mail.subject.as_deref(), Some("bare"));
        // No body separator: everything is headers, body empty.
        assert_eq!(mail.text_body.as_deref(), Some(""));
    }
}

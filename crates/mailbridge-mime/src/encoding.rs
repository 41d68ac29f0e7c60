//! Transfer and header decoding.
//!
//! Supports Base64, Quoted-Printable (RFC 2045) and RFC 2047 encoded-word
//! header decoding. Decoding is lenient where real-world mail demands it:
//! whitespace inside Base64 bodies is ignored and unknown charsets fall back
//! to lossy UTF-8.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// Decodes Base64 data, ignoring embedded whitespace.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64 after whitespace
/// removal.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable bytes (RFC 2045).
///
/// Soft line breaks (`=` at end of line) are removed; `=XX` escapes become
/// the named byte. Invalid escapes are passed through literally, matching
/// how permissive mail servers treat them.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let b = data[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }

        // Soft line break: "=\r\n" or "=\n"
        if data.get(i + 1) == Some(&b'\r') && data.get(i + 2) == Some(&b'\n') {
            i += 3;
            continue;
        }
        if data.get(i + 1) == Some(&b'\n') {
            i += 2;
            continue;
        }

        match (data.get(i + 1), data.get(i + 2)) {
            (Some(&hi), Some(&lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                let hex = [hi, lo];
                // Both digits verified above
                let s = std::str::from_utf8(&hex).unwrap_or("00");
                if let Ok(byte) = u8::from_str_radix(s, 16) {
                    out.push(byte);
                }
                i += 3;
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }

    out
}

/// Decodes an RFC 2047 header value.
///
/// A header may contain any number of encoded words
/// (`=?charset?B|Q?text?=`) mixed with plain text. Whitespace between two
/// adjacent encoded words is dropped per the RFC; whitespace next to plain
/// text is preserved. Values without encoded words are returned unchanged.
#[must_use]
pub fn decode_header(value: &str) -> String {
    if !value.contains("=?") {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut prev_was_encoded = false;

    while let Some(start) = rest.find("=?") {
        let (before, tail) = rest.split_at(start);

        let Some(word) = parse_encoded_word(tail) else {
            // Not a well-formed encoded word; emit the marker and move on.
            out.push_str(before);
            out.push_str("=?");
            rest = &tail[2..];
            prev_was_encoded = false;
            continue;
        };

        if !(before.chars().all(char::is_whitespace) && prev_was_encoded) {
            // Whitespace between two encoded words is transparent.
            out.push_str(before);
        }

        out.push_str(&word.decoded);
        prev_was_encoded = true;
        rest = &tail[word.consumed..];
    }

    out.push_str(rest);
    out
}

struct EncodedWord {
    decoded: String,
    consumed: usize,
}

/// Parses a single `=?charset?enc?text?=` prefix of `s`.
fn parse_encoded_word(s: &str) -> Option<EncodedWord> {
    let inner = s.strip_prefix("=?")?;
    let (charset, inner) = inner.split_once('?')?;
    let (enc, inner) = inner.split_once('?')?;
    let end = inner.find("?=")?;
    let text = &inner[..end];

    let bytes = match enc {
        "B" | "b" => decode_base64(text).ok()?,
        "Q" | "q" => decode_quoted_printable(text.replace('_', " ").as_bytes()),
        _ => return None,
    };

    let decoded = decode_charset(charset, &bytes);
    // "=?" + charset + "?" + enc + "?" + text + "?="
    let consumed = 2 + charset.len() + 1 + enc.len() + 1 + end + 2;
    Some(EncodedWord { decoded, consumed })
}

/// Converts bytes in the named charset to a String.
///
/// UTF-8 and ASCII decode exactly; ISO-8859-1 maps bytes to code points;
/// anything else falls back to lossy UTF-8.
#[must_use]
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    let lower = charset.to_ascii_lowercase();
    match lower.as_str() {
        "iso-8859-1" | "latin1" | "windows-1252" => bytes.iter().map(|&b| b as char).collect(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

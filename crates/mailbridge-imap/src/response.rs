//! Response parsing.
//!
//! A deliberately small, line-oriented parser covering the responses the
//! aggregation core consumes: tagged status lines, EXISTS / RECENT /
//! EXPUNGE counters, SEARCH results, FETCH items with UID and one body
//! literal, BYE, and continuations. Anything else parses as
//! [`Untagged::Other`] and is ignored by callers.

use crate::error::{Error, Result};

/// Status of a tagged response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed.
    Ok,
    /// Command failed.
    No,
    /// Command was malformed or invalid in this state.
    Bad,
}

/// Untagged responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    /// Current message count.
    Exists(u32),
    /// Recent message count.
    Recent(u32),
    /// A message was removed; sequence number.
    Expunge(u32),
    /// SEARCH result UIDs (for UID SEARCH) or sequence numbers.
    Search(Vec<u32>),
    /// FETCH data for one message.
    Fetch {
        /// Sequence number.
        seq: u32,
        /// UID when the response carried one.
        uid: Option<u32>,
        /// Body literal when the response carried one.
        body: Option<Vec<u8>>,
    },
    /// Server is disconnecting.
    Bye(String),
    /// Anything this client does not act on (OK/FLAGS/CAPABILITY/...).
    Other,
}

/// One parsed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Tagged completion of a command.
    Tagged {
        /// The echoed command tag.
        tag: String,
        /// Completion status.
        status: Status,
        /// Human-readable remainder of the line.
        text: String,
    },
    /// Untagged server data.
    Untagged(Untagged),
    /// Continuation request (`+ ...`).
    Continuation,
}

/// Parses one complete logical response as returned by
/// [`crate::FramedStream::read_response`].
///
/// # Errors
///
/// Returns an error for empty input or a tagged line without a status.
pub fn parse_response(raw: &[u8]) -> Result<Response> {
    // Only the first line is structural; a literal may follow it.
    let line_end = raw
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(raw.len());
    let line = String::from_utf8_lossy(&raw[..line_end]).into_owned();

    if line.is_empty() {
        return Err(Error::Protocol("empty response".to_string()));
    }

    if line == "+" || line.starts_with("+ ") {
        return Ok(Response::Continuation);
    }

    if let Some(rest) = line.strip_prefix("* ") {
        return Ok(Response::Untagged(parse_untagged(rest, raw)));
    }

    parse_tagged(&line)
}

fn parse_tagged(line: &str) -> Result<Response> {
    let (tag, rest) = line
        .split_once(' ')
        .ok_or_else(|| Error::Protocol(format!("malformed tagged response: {line:?}")))?;

    let (status_word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = match status_word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        other => {
            return Err(Error::Protocol(format!(
                "unknown tagged status {other:?} in {line:?}"
            )));
        }
    };

    Ok(Response::Tagged {
        tag: tag.to_string(),
        status,
        text: text.to_string(),
    })
}

fn parse_untagged(rest: &str, raw: &[u8]) -> Untagged {
    if let Some(text) = rest.strip_prefix("BYE") {
        return Untagged::Bye(text.trim().to_string());
    }

    if let Some(numbers) = rest.strip_prefix("SEARCH") {
        let ids = numbers
            .split_whitespace()
            .filter_map(|n| n.parse().ok())
            .collect();
        return Untagged::Search(ids);
    }

    // "<n> EXISTS" / "<n> RECENT" / "<n> EXPUNGE" / "<n> FETCH (...)"
    if let Some((number, keyword)) = rest.split_once(' ')
        && let Ok(n) = number.parse::<u32>()
    {
        let keyword_upper = keyword
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        return match keyword_upper.as_str() {
            "EXISTS" => Untagged::Exists(n),
            "RECENT" => Untagged::Recent(n),
            "EXPUNGE" => Untagged::Expunge(n),
            "FETCH" => parse_fetch(n, keyword, raw),
            _ => Untagged::Other,
        };
    }

    Untagged::Other
}

/// Extracts UID and the body literal from a FETCH response.
fn parse_fetch(seq: u32, line_rest: &str, raw: &[u8]) -> Untagged {
    let tokens: Vec<&str> = line_rest.split_whitespace().collect();
    let uid = tokens
        .iter()
        .position(|word| word.trim_start_matches('(').eq_ignore_ascii_case("UID"))
        .and_then(|i| tokens.get(i + 1))
        .and_then(|value| value.trim_end_matches(')').parse().ok());

    let body = fetch_literal(raw);

    Untagged::Fetch { seq, uid, body }
}

/// Returns the first literal's bytes from a raw response.
fn fetch_literal(raw: &[u8]) -> Option<Vec<u8>> {
    let line_end = raw.windows(2).position(|w| w == b"\r\n")?;
    let line = &raw[..line_end];

    let open = line.iter().rposition(|&b| b == b'{')?;
    let close = line[open..].iter().position(|&b| b == b'}')? + open;
    let digits = &line[open + 1..close];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);
    let len: usize = std::str::from_utf8(digits).ok()?.parse().ok()?;

    let start = line_end + 2;
    raw.get(start..start + len).map(<[u8]>::to_vec)
}

//! Message pipeline: fetch, parse, normalize, filter, order.
//!
//! Raw bodies from a backend's fetch window become canonical [`Message`]
//! records plus their attachment payloads. Malformed messages are dropped
//! individually; the batch survives. Recipient filtering is re-applied
//! here even though the IMAP search already filtered, because TO search
//! is substring-based on some servers.

use chrono::{DateTime, Utc};

use mailbridge_imap::FetchedMessage;
use mailbridge_mime::ParsedMail;

use crate::connection::BackendConnection;
use crate::error::Result;
use crate::message::{AttachmentData, AttachmentInfo, Message, MessagePayload, Provider};

/// A normalized message together with its payload-cache entry.
pub type PipelineItem = (Message, MessagePayload);

/// Fetches and normalizes the recent window for one backend.
///
/// `target` is the normalized recipient to filter by, when the request
/// was for a specific address; `provider` is the routing classification
/// the resulting messages carry.
///
/// # Errors
///
/// Returns connection-level errors; per-message parse failures are
/// logged and skipped.
pub async fn fetch_backend(
    connection: &BackendConnection,
    target: Option<&str>,
    provider: Provider,
    limit: usize,
) -> Result<Vec<PipelineItem>> {
    let backend = connection.account().address.clone();
    let fetched = connection.fetch_window(target, limit).await?;

    let mut items: Vec<PipelineItem> = fetched
        .iter()
        .filter_map(|raw| normalize(&backend, provider, raw))
        .filter(|(message, _)| {
            target.is_none_or(|t| message.normalized_to() == t)
        })
        .collect();

    sort_newest_first(&mut items);
    Ok(items)
}

/// Parses one fetched body into the canonical record.
///
/// Returns `None` for unparseable messages.
#[must_use]
pub fn normalize(backend: &str, provider: Provider, raw: &FetchedMessage) -> Option<PipelineItem> {
    let parsed = match ParsedMail::parse(&raw.body) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(backend, uid = raw.uid, error = %e, "dropping unparseable message");
            return None;
        }
    };

    Some(assemble(backend, provider, raw.uid, parsed))
}

fn assemble(backend: &str, provider: Provider, uid: u32, parsed: ParsedMail) -> PipelineItem {
    let id = parsed
        .message_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Message::fallback_id(backend, uid));

    let (from, from_name) = parsed
        .from
        .as_ref()
        .map_or_else(|| (String::new(), None), |mb| (mb.address.clone(), mb.name.clone()));

    let to = parsed
        .to
        .first()
        .map(|mb| mb.address.clone())
        .unwrap_or_default();

    let is_alias = !to.eq_ignore_ascii_case(backend);

    let attachments = parsed
        .attachments
        .iter()
        .map(|a| AttachmentInfo {
            filename: a.filename.clone(),
            content_type: a.content_type.clone(),
            size_bytes: a.data.len(),
        })
        .collect();

    let payload = MessagePayload {
        attachments: parsed
            .attachments
            .into_iter()
            .map(|a| AttachmentData {
                filename: a.filename,
                content_type: a.content_type,
                data: a.data,
            })
            .collect(),
    };

    let message = Message {
        id,
        uid,
        from,
        from_name,
        to,
        subject: parsed.subject.unwrap_or_default(),
        date: parse_date(parsed.date.as_deref()),
        text_body: parsed.text_body,
        html_body: parsed.html_body,
        attachments,
        backend: backend.to_string(),
        provider,
        is_alias,
    };

    (message, payload)
}

/// Orders newest first; the pipeline's only ordering guarantee.
pub fn sort_newest_first(items: &mut [PipelineItem]) {
    items.sort_by(|(a, _), (b, _)| b.date.cmp(&a.date));
}

/// Parses an RFC 2822 date, tolerating trailing comments like `(UTC)`.
///
/// Unparseable dates become the epoch so malformed messages sort last
/// instead of being dropped.
fn parse_date(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return DateTime::UNIX_EPOCH;
    };

    let trimmed = raw.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(trimmed) {
        return date.with_timezone(&Utc);
    }

    // Second try without a trailing comment.
    if let Some(open) = trimmed.rfind('(')
        && let Ok(date) = DateTime::parse_from_rfc2822(trimmed[..open].trim())
    {
        return date.with_timezone(&Utc);
    }

    DateTime::UNIX_EPOCH
}

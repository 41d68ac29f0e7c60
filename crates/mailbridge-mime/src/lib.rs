//! # mailbridge-mime
//!
//! RFC 5322 / MIME parsing for the mailbridge aggregation core.
//!
//! This crate turns raw message bytes fetched over IMAP into a structured
//! [`ParsedMail`]: decoded headers, the first `text/plain` and `text/html`
//! bodies, and every attachment with its raw bytes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailbridge_mime::ParsedMail;
//!
//! let raw = b"From: Alice <alice@example.com>\r\n\
//!             To: bob+shop@example.com\r\n\
//!             Subject: =?utf-8?B?SMOpbGxv?=\r\n\
//!             Content-Type: text/plain\r\n\
//!             \r\n\
//!             Hi Bob";
//!
//! let mail = ParsedMail::parse(raw)?;
//! assert_eq!(mail.subject.as_deref(), Some("Héllo"));
//! assert_eq!(mail.text_body.as_deref(), Some("Hi Bob"));
//! ```
//!
//! Only parsing is provided; message generation belongs to a sending stack
//! this project does not carry.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use address::{Mailbox, parse_address, parse_address_list};
pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{AttachmentPart, ParsedMail, Part, TransferEncoding};

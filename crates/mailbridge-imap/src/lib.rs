//! # mailbridge-imap
//!
//! A small async IMAP4rev1 client covering exactly the surface the
//! mailbridge aggregation core drives: implicit-TLS connect, LOGIN,
//! SELECT INBOX, UID SEARCH, UID FETCH of full bodies, UID STORE +
//! EXPUNGE for deletion, NOOP, LOGOUT, and IDLE (RFC 2177) for push
//! notifications.
//!
//! ## Design
//!
//! - **Type-state client**: `Client<S, NotAuthenticated>` → `login()` →
//!   `Client<S, Authenticated>` → `select()` → `Client<S, Selected>`.
//!   Invalid command/state combinations do not compile.
//! - **Framed I/O**: CRLF-terminated lines with `{n}` literal support,
//!   accumulated until the matching tagged response.
//! - **TLS via rustls**: webpki root store, no OpenSSL.
//! - **Rate-limit surfacing**: provider "too many connections" NO
//!   responses are distinguishable via [`Error::is_rate_limited`], so the
//!   caller's admission layer can arm a cooldown instead of retrying hot.
//!
//! The client is generic over the stream, so protocol behavior is tested
//! against in-memory mock streams.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
mod command;
mod config;
mod error;
mod framed;
mod idle;
mod response;
mod stream;

pub use client::{Authenticated, Client, FetchedMessage, MailboxStatus, NotAuthenticated, Selected};
pub use command::{Command, SearchCriteria, TagGenerator};
pub use config::Config;
pub use error::{Error, Result};
pub use framed::FramedStream;
pub use idle::{IdleEvent, IdleHandle};
pub use response::{Response, Status, Untagged, parse_response};
pub use stream::{ImapStream, connect_tls};

//! # mailbridge-core
//!
//! The IMAP aggregation and control layer behind the mailbridge API: a
//! uniform view over email accounts reached by IMAP, serving catch-all
//! domain addresses and provider aliases (Gmail / Outlook plus-tags and
//! Gmail dot-variants) regardless of which physical mailbox holds the
//! bytes.
//!
//! The heart of the crate is [`InboxService`], which owns:
//!
//! - the [`account::AccountRegistry`] built from environment configuration
//! - an [`queue::AdmissionQueue`] per backend: bounded concurrency, a
//!   per-second ceiling, exponential backoff, external cooldowns
//! - a [`connection::BackendConnection`] per backend: one shared
//!   long-lived read session plus ephemeral sessions for mutations
//! - an [`idle::IdleListener`] per backend: IDLE-driven cache
//!   invalidation and debounced change notifications
//! - three TTL-bounded LRU caches (per-address views, the global message
//!   store, attachment payloads)
//! - the HTTP-facing [`limiter::LimiterSet`] whose email-ops denials arm
//!   the admission cooldowns
//!
//! Reads are total: on IMAP failure the caller gets the stale cached
//! view, then empty, never an error. Mutations report honestly.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod alias;
pub mod cache;
pub mod config;
pub mod connection;
mod error;
pub mod idle;
pub mod limiter;
pub mod message;
pub mod pipeline;
pub mod queue;
pub mod service;

pub use account::{Account, AccountRegistry, Credentials};
pub use alias::{Alias, CatchAll, Route, Router, generate_dot_alias, generate_plus_alias};
pub use config::{AccountConfig, Profile, Settings};
pub use error::{Error, Result};
pub use message::{AttachmentInfo, Message, Provider, Viewer};
pub use service::{
    AccountsView, AttachmentDownload, InboxService, StatsSnapshot, Subscription,
};

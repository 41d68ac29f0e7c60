//! Per-backend connection management.
//!
//! Each backend owns one *shared read session*, opened lazily, kept
//! selected on INBOX, and reused for searches, fetches, and attachment
//! pulls. Mutations (flag + expunge) run on short-lived *ephemeral
//! sessions* so a long fetch can never deadlock a delete.
//!
//! The shared session's lifecycle is
//! `Disconnected → Connecting → Connected → Error → Disconnected`; any
//! error tears the session down and arms the reconnect gate, and the next
//! request triggers the re-open. Requests arriving while the gate is
//! closed fail fast as transient so the admission queue paces them.

use std::sync::{Arc, Mutex as StdMutex};

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use mailbridge_imap::{
    Client, Config as ImapConfig, FetchedMessage, ImapStream, NotAuthenticated, SearchCriteria,
    Selected, connect_tls,
};

use crate::account::Account;
use crate::error::{Error, Result};

const MAILBOX: &str = "INBOX";

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(60);
const RECONNECT_MAX_ATTEMPTS: u32 = 10;
const RECONNECT_LONG_COOLDOWN: Duration = Duration::from_secs(300);

const CONNECT_DEADLINE: Duration = Duration::from_secs(15);
const AUTH_DEADLINE: Duration = Duration::from_secs(10);
const COMMAND_DEADLINE: Duration = Duration::from_secs(20);

enum SessionState {
    Disconnected,
    Connected(Box<Client<ImapStream, Selected>>),
}

/// Reconnect pacing: exponential backoff with jitter, then a long
/// cooldown once the attempt budget is exhausted.
#[derive(Debug, Default)]
struct ReconnectGate {
    attempts: u32,
    resume_at: Option<Instant>,
}

impl ReconnectGate {
    /// Whether a connection attempt may start now.
    fn open(&self, now: Instant) -> bool {
        self.resume_at.is_none_or(|at| now >= at)
    }

    fn record_failure(&mut self, now: Instant) {
        self.attempts += 1;
        if self.attempts > RECONNECT_MAX_ATTEMPTS {
            self.resume_at = Some(now + RECONNECT_LONG_COOLDOWN);
            self.attempts = 0;
            return;
        }
        let exponent = self.attempts.saturating_sub(1).min(16);
        let delay = RECONNECT_BASE
            .saturating_mul(1 << exponent)
            .min(RECONNECT_CAP)
            .mul_f64(rand::thread_rng().gen_range(0.75..1.25));
        self.resume_at = Some(now + delay);
    }

    fn reset(&mut self) {
        self.attempts = 0;
        self.resume_at = None;
    }
}

/// Connection manager for one backend mailbox.
pub struct BackendConnection {
    account: Arc<Account>,
    shared: Mutex<SessionState>,
    gate: StdMutex<ReconnectGate>,
}

impl BackendConnection {
    /// Creates a manager; no connection is opened until first use.
    #[must_use]
    pub fn new(account: Arc<Account>) -> Self {
        Self {
            account,
            shared: Mutex::new(SessionState::Disconnected),
            gate: StdMutex::new(ReconnectGate::default()),
        }
    }

    /// The account this manager serves.
    #[must_use]
    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    /// Searches INBOX and fetches the most recent `limit` matches with
    /// full bodies, on the shared session.
    ///
    /// # Errors
    ///
    /// Returns a transient error while the reconnect gate is closed, or
    /// the IMAP error that tore the session down.
    pub async fn fetch_window(
        &self,
        target: Option<&str>,
        limit: usize,
    ) -> Result<Vec<FetchedMessage>> {
        let criteria = target.map_or(SearchCriteria::All, |t| SearchCriteria::To(t.to_string()));

        let mut shared = self.shared.lock().await;
        let client = self.ensure_connected(&mut shared).await?;

        let result = async {
            client.reselect(MAILBOX).await?;
            let uids = client.uid_search(criteria).await?;
            let window = recent_window(&uids, limit);
            if window.is_empty() {
                return Ok(Vec::new());
            }
            Ok(client.uid_fetch_full(&window).await?)
        }
        .await;

        self.teardown_on_dead_connection(&mut shared, result.as_ref().err());
        result
    }

    /// Fetches one message by UID on the shared session.
    ///
    /// # Errors
    ///
    /// As [`BackendConnection::fetch_window`].
    pub async fn fetch_message(&self, uid: u32) -> Result<Option<FetchedMessage>> {
        let mut shared = self.shared.lock().await;
        let client = self.ensure_connected(&mut shared).await?;

        let result = async {
            let mut messages = client.uid_fetch_full(&uid.to_string()).await?;
            Ok(messages.pop())
        }
        .await;

        self.teardown_on_dead_connection(&mut shared, result.as_ref().err());
        result
    }

    /// Deletes one message (flag + expunge) on an ephemeral session.
    ///
    /// Returns `false` when the UID no longer exists in the mailbox.
    ///
    /// # Errors
    ///
    /// Returns connection or command errors; the shared session is
    /// unaffected.
    pub async fn delete_message(&self, uid: u32) -> Result<bool> {
        let mut session = self.open_session().await?;

        let found = !session.uid_search(SearchCriteria::Uid(uid)).await?.is_empty();
        if found {
            session.uid_store_deleted(&uid.to_string()).await?;
            session.expunge().await?;
        }

        let _ = session.logout().await;
        Ok(found)
    }

    /// Opens a fresh session selected on INBOX.
    ///
    /// Used for ephemeral mutations and by the IDLE listener, which owns
    /// its session outright.
    ///
    /// # Errors
    ///
    /// Returns connection, auth, or select errors.
    pub async fn open_session(&self) -> Result<Client<ImapStream, Selected>> {
        let config = ImapConfig::new(self.account.imap_host.clone())
            .port(self.account.imap_port)
            .connect_timeout(CONNECT_DEADLINE);

        let stream = connect_tls(&config).await?;
        let mut client: Client<ImapStream, NotAuthenticated> = Client::from_stream(stream).await?;

        client.set_command_timeout(AUTH_DEADLINE);
        let authenticated = client
            .login(&self.account.address, self.account.credentials().secret())
            .await?;

        let (mut selected, _status) = authenticated.select(MAILBOX).await?;
        selected.set_command_timeout(COMMAND_DEADLINE);
        Ok(selected)
    }

    /// Closes the shared session, if open.
    pub async fn shutdown(&self) {
        let mut shared = self.shared.lock().await;
        if let SessionState::Connected(client) =
            std::mem::replace(&mut *shared, SessionState::Disconnected)
        {
            let _ = client.logout().await;
        }
    }

    /// Makes the shared session usable, connecting when disconnected and
    /// the reconnect gate permits.
    async fn ensure_connected<'a>(
        &self,
        shared: &'a mut SessionState,
    ) -> Result<&'a mut Client<ImapStream, Selected>> {
        if matches!(shared, SessionState::Disconnected) {
            if !self.lock_gate().open(Instant::now()) {
                return Err(Error::Transient(format!(
                    "{}: reconnect backoff in effect",
                    self.account.address
                )));
            }

            match self.open_session().await {
                Ok(client) => {
                    self.lock_gate().reset();
                    *shared = SessionState::Connected(Box::new(client));
                }
                Err(e) => {
                    self.lock_gate().record_failure(Instant::now());
                    tracing::warn!(
                        backend = %self.account.address,
                        error = %e,
                        "shared session connect failed"
                    );
                    return Err(e);
                }
            }
        }

        match shared {
            SessionState::Connected(client) => Ok(client),
            SessionState::Disconnected => Err(Error::Transient("session unavailable".into())),
        }
    }

    /// Drops the shared session after a connection-fatal error so the
    /// next request reconnects.
    fn teardown_on_dead_connection(&self, shared: &mut SessionState, error: Option<&Error>) {
        let dead = matches!(error, Some(Error::Imap(imap)) if imap.is_connection_dead());
        if dead {
            tracing::warn!(
                backend = %self.account.address,
                error = %error.map(ToString::to_string).unwrap_or_default(),
                "shared session torn down"
            );
            *shared = SessionState::Disconnected;
            self.lock_gate().record_failure(Instant::now());
        }
    }

    fn lock_gate(&self) -> std::sync::MutexGuard<'_, ReconnectGate> {
        self.gate
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The last `limit` UIDs in mailbox order, formatted as a UID set.
fn recent_window(uids: &[u32], limit: usize) -> String {
    let start = uids.len().saturating_sub(limit);
    uids[start..]
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn recent_window_takes_tail() {
        assert_eq!(recent_window(&[1, 2, 3, 4, 5], 3), "3,4,5");
        assert_eq!(recent_window(&[1, 2], 10), "1,2");
        assert_eq!(recent_window(&[], 10), "");
    }

    #[tokio::test(start_paused = true)]
    async fn gate_backs_off_exponentially() {
        let mut gate = ReconnectGate::default();
        let t0 = Instant::now();

        gate.record_failure(t0);
        let first = gate.resume_at.unwrap() - t0;
        assert!(first >= Duration::from_millis(750) && first <= Duration::from_millis(1250));

        gate.record_failure(t0);
        let second = gate.resume_at.unwrap() - t0;
        assert!(second >= Duration::from_millis(1500) && second <= Duration::from_millis(2500));

        assert!(!gate.open(t0));
        assert!(gate.open(t0 + Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_delay_is_capped() {
        let mut gate = ReconnectGate::default();
        let t0 = Instant::now();
        for _ in 0..9 {
            gate.record_failure(t0);
        }
        let delay = gate.resume_at.unwrap() - t0;
        assert!(delay <= Duration::from_secs(75));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_long_cooldown_after_budget() {
        let mut gate = ReconnectGate::default();
        let t0 = Instant::now();
        for _ in 0..=RECONNECT_MAX_ATTEMPTS {
            gate.record_failure(t0);
        }
        // Budget exhausted: five-minute cooldown, counter reset.
        assert_eq!(gate.attempts, 0);
        let delay = gate.resume_at.unwrap() - t0;
        assert_eq!(delay, RECONNECT_LONG_COOLDOWN);

        assert!(!gate.open(t0 + Duration::from_secs(299)));
        assert!(gate.open(t0 + Duration::from_secs(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_reset_clears_state() {
        let mut gate = ReconnectGate::default();
        gate.record_failure(Instant::now());
        gate.reset();
        assert!(gate.open(Instant::now()));
        assert_eq!(gate.attempts, 0);
    }
}

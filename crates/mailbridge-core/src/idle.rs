//! IDLE listener: one push-notification session per backend.
//!
//! Each listener owns a second long-lived IMAP session kept in IDLE on
//! INBOX. EXISTS and EXPUNGE wake-ups are forwarded to the service's
//! event loop, which zeroes freshness immediately and debounces the
//! subscriber fan-out. IDLE is cycled every 25 minutes to stay under the
//! common 29-minute server timeout; errors reconnect with the same
//! exponential backoff the read path uses.

use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, sleep, timeout};

use mailbridge_imap::{Client, IdleEvent, ImapStream, Selected};

use crate::connection::BackendConnection;

const IDLE_CYCLE: Duration = Duration::from_secs(25 * 60);
const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What changed in a backend's mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// New mail arrived.
    NewMail,
    /// A message was expunged.
    Expunge,
}

/// A change notification from one backend's IDLE session.
#[derive(Debug, Clone)]
pub struct MailboxEvent {
    /// The backend mailbox that changed.
    pub backend: String,
    /// What happened.
    pub kind: ChangeKind,
}

/// Handle to a running IDLE listener task.
pub struct IdleListener {
    stop: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl IdleListener {
    /// Spawns the listener for one backend.
    #[must_use]
    pub fn spawn(
        connection: Arc<BackendConnection>,
        events: mpsc::UnboundedSender<MailboxEvent>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(listener_loop(connection, events, stop_rx));
        Self { stop, task }
    }

    /// Stops the listener, waiting briefly for a clean exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if timeout(SHUTDOWN_GRACE, self.task).await.is_err() {
            tracing::debug!("idle listener did not stop in time");
        }
    }
}

async fn listener_loop(
    connection: Arc<BackendConnection>,
    events: mpsc::UnboundedSender<MailboxEvent>,
    mut stop: watch::Receiver<bool>,
) {
    let backend = connection.account().address.clone();
    let mut attempts: u32 = 0;

    loop {
        if *stop.borrow() {
            return;
        }

        match connection.open_session().await {
            Ok(mut session) => {
                attempts = 0;
                tracing::info!(%backend, "idle session established");
                match watch_mailbox(&mut session, &backend, &events, &mut stop).await {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::warn!(%backend, error = %e, "idle session lost");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%backend, error = %e, "idle connect failed");
            }
        }

        attempts += 1;
        let delay = reconnect_delay(attempts);
        tokio::select! {
            _ = stop.changed() => return,
            () = sleep(delay) => {}
        }
    }
}

/// Runs IDLE cycles on one session until stop or error.
///
/// Returns `Ok(())` only on an orderly stop.
async fn watch_mailbox(
    session: &mut Client<ImapStream, Selected>,
    backend: &str,
    events: &mpsc::UnboundedSender<MailboxEvent>,
    stop: &mut watch::Receiver<bool>,
) -> crate::error::Result<()> {
    loop {
        let cycle_end = Instant::now() + IDLE_CYCLE;
        let mut handle = session.idle().await.map_err(crate::error::Error::from)?;

        let stopped = loop {
            let remaining = cycle_end.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break false;
            }

            tokio::select! {
                _ = stop.changed() => break true,
                event = handle.wait(remaining) => match event? {
                    IdleEvent::Exists(count) => {
                        tracing::debug!(%backend, count, "idle: new mail");
                        let _ = events.send(MailboxEvent {
                            backend: backend.to_string(),
                            kind: ChangeKind::NewMail,
                        });
                    }
                    IdleEvent::Expunge(seq) => {
                        tracing::debug!(%backend, seq, "idle: expunge");
                        let _ = events.send(MailboxEvent {
                            backend: backend.to_string(),
                            kind: ChangeKind::Expunge,
                        });
                    }
                    IdleEvent::Timeout => {}
                },
            }
        };

        if stopped {
            let _ = timeout(SHUTDOWN_GRACE, handle.done()).await;
            return Ok(());
        }

        // Cycle: leave IDLE, confirm liveness, refresh the selection,
        // re-enter on the next loop pass.
        handle.done().await?;
        session.noop().await?;
        session.reselect("INBOX").await?;
    }
}

fn reconnect_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    RECONNECT_BASE
        .saturating_mul(1 << exponent)
        .min(RECONNECT_CAP)
        .mul_f64(rand::thread_rng().gen_range(0.75..1.25))
}

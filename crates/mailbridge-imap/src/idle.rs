//! IMAP IDLE support (RFC 2177).

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::client::{Client, Selected, check_tagged_ok};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::framed::FramedStream;
use crate::response::{Response, Untagged, parse_response};

/// Event received while idling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    /// New message count (EXISTS).
    Exists(u32),
    /// A message was removed (EXPUNGE), sequence number.
    Expunge(u32),
    /// The wait elapsed without a relevant event.
    Timeout,
}

/// Handle for an active IDLE session.
///
/// Holds the connection's framed stream until [`IdleHandle::done`] sends
/// DONE and returns control to the client.
pub struct IdleHandle<'a, S> {
    stream: &'a mut FramedStream<S>,
    tag: String,
}

impl<S> IdleHandle<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Waits for a mailbox change or the given duration.
    ///
    /// Untagged responses that are neither EXISTS nor EXPUNGE (RECENT,
    /// FETCH flag updates) are skipped. A tagged response here means the
    /// server ended IDLE on its own, which surfaces as an error so the
    /// caller re-establishes the session.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, BYE, or server-side termination.
    pub async fn wait(&mut self, duration: Duration) -> Result<IdleEvent> {
        let deadline = tokio::time::Instant::now() + duration;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let raw = match timeout(remaining, self.stream.read_response()).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Ok(IdleEvent::Timeout),
            };

            match parse_response(&raw)? {
                Response::Untagged(Untagged::Exists(n)) => return Ok(IdleEvent::Exists(n)),
                Response::Untagged(Untagged::Expunge(seq)) => return Ok(IdleEvent::Expunge(seq)),
                Response::Untagged(Untagged::Bye(text)) => return Err(Error::Bye(text)),
                Response::Untagged(_) => {}
                Response::Tagged { text, .. } => {
                    return Err(Error::Protocol(format!(
                        "server terminated IDLE: {text}"
                    )));
                }
                Response::Continuation => {
                    return Err(Error::Protocol(
                        "unexpected continuation during IDLE".to_string(),
                    ));
                }
            }
        }
    }

    /// Exits IDLE by sending DONE and waiting for the tagged completion.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or a non-OK completion.
    pub async fn done(self) -> Result<()> {
        let command = Command::Done.serialize("");
        self.stream.write_command(&command).await?;

        let responses = self.stream.read_until_tagged(&self.tag).await?;
        check_tagged_ok(&responses, &self.tag)
    }
}

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Enters IDLE mode.
    ///
    /// Returns a handle whose `wait` surfaces mailbox changes; call
    /// `done()` to resume issuing regular commands. Cycle IDLE well under
    /// the 29-minute server limit.
    ///
    /// # Errors
    ///
    /// Returns an error when the server refuses IDLE.
    pub async fn idle(&mut self) -> Result<IdleHandle<'_, S>> {
        let tag = self.tags.next();
        let command = Command::Idle.serialize(&tag);
        self.stream.write_command(&command).await?;

        let raw = self.stream.read_response().await?;
        match parse_response(&raw)? {
            Response::Continuation => Ok(IdleHandle {
                stream: &mut self.stream,
                tag,
            }),
            Response::Tagged { text, .. } => Err(Error::No(text)),
            Response::Untagged(_) => Err(Error::Protocol(
                "expected continuation for IDLE".to_string(),
            )),
        }
    }
}

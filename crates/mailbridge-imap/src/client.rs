//! Type-state IMAP client.
//!
//! State transitions mirror the protocol: `NotAuthenticated` → `login()` →
//! `Authenticated` → `select()` → `Selected`. Each state only exposes the
//! commands valid in it, so misuse does not compile.

use std::marker::PhantomData;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::command::{Command, SearchCriteria, TagGenerator};
use crate::error::{Error, Result};
use crate::framed::FramedStream;
use crate::response::{Response, Status, Untagged, parse_response};

/// Marker type for the not-authenticated state.
#[derive(Debug, Clone, Copy)]
pub struct NotAuthenticated;

/// Marker type for the authenticated state.
#[derive(Debug, Clone, Copy)]
pub struct Authenticated;

/// Marker type for the selected state.
#[derive(Debug, Clone, Copy)]
pub struct Selected;

/// Counts reported by SELECT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
}

/// One message returned by a full-body UID FETCH.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    /// The message UID.
    pub uid: u32,
    /// Raw RFC 5322 bytes.
    pub body: Vec<u8>,
}

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(20);

/// IMAP client; the `State` parameter tracks the protocol state.
pub struct Client<S, State> {
    pub(crate) stream: FramedStream<S>,
    pub(crate) tags: TagGenerator,
    command_timeout: Duration,
    _state: PhantomData<State>,
}

impl<S, State> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Sets the per-command deadline.
    pub const fn set_command_timeout(&mut self, deadline: Duration) {
        self.command_timeout = deadline;
    }

    fn transition<Next>(self) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tags: self.tags,
            command_timeout: self.command_timeout,
            _state: PhantomData,
        }
    }

    /// Sends a command and returns every response up to the tagged one,
    /// after verifying the tagged status is OK.
    pub(crate) async fn run(&mut self, command: &Command) -> Result<Vec<Vec<u8>>> {
        let tag = self.tags.next();
        let serialized = command.serialize(&tag);

        let deadline = self.command_timeout;
        timeout(deadline, async {
            self.stream.write_command(&serialized).await?;
            let responses = self.stream.read_until_tagged(&tag).await?;
            check_tagged_ok(&responses, &tag)?;
            Ok(responses)
        })
        .await
        .map_err(|_| Error::Timeout(deadline))?
    }
}

/// Finds our tagged response and maps its status; surfaces untagged BYE.
pub(crate) fn check_tagged_ok(responses: &[Vec<u8>], tag: &str) -> Result<()> {
    for raw in responses.iter().rev() {
        match parse_response(raw) {
            Ok(Response::Tagged {
                tag: response_tag,
                status,
                text,
            }) if response_tag == tag => {
                return match status {
                    Status::Ok => Ok(()),
                    Status::No => Err(Error::No(text)),
                    Status::Bad => Err(Error::Bad(text)),
                };
            }
            Ok(Response::Untagged(Untagged::Bye(text))) => {
                return Err(Error::Bye(text));
            }
            _ => {}
        }
    }

    Err(Error::Protocol("missing tagged response".to_string()))
}

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream and consumes the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or a BYE greeting.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut framed = FramedStream::new(stream);

        let greeting = framed.read_response().await?;
        if let Ok(Response::Untagged(Untagged::Bye(text))) = parse_response(&greeting) {
            return Err(Error::Bye(text));
        }

        Ok(Self {
            stream: framed,
            tags: TagGenerator::default(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            _state: PhantomData,
        })
    }

    /// Authenticates with LOGIN, consuming self.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when the server rejects the credentials,
    /// or the underlying transport error.
    pub async fn login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        let command = Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        };

        match self.run(&command).await {
            Ok(_) => Ok(self.transition()),
            Err(Error::No(text)) => Err(Error::Auth(text)),
            Err(e) => Err(e),
        }
    }
}

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Selects a mailbox read-write, consuming self.
    ///
    /// # Errors
    ///
    /// Returns an error when the mailbox cannot be selected.
    pub async fn select(mut self, mailbox: &str) -> Result<(Client<S, Selected>, MailboxStatus)> {
        let responses = self
            .run(&Command::Select {
                mailbox: mailbox.to_string(),
            })
            .await?;

        Ok((self.transition(), extract_status(&responses)))
    }

    /// Gracefully disconnects.
    pub async fn logout(mut self) -> Result<()> {
        let _ = self.run(&Command::Logout).await;
        Ok(())
    }
}

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Re-issues SELECT on a mailbox to refresh the message counts.
    ///
    /// # Errors
    ///
    /// Returns an error when the command fails.
    pub async fn reselect(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        let responses = self
            .run(&Command::Select {
                mailbox: mailbox.to_string(),
            })
            .await?;
        Ok(extract_status(&responses))
    }

    /// UID SEARCH; returns matching UIDs in mailbox order.
    ///
    /// # Errors
    ///
    /// Returns an error when the command fails.
    pub async fn uid_search(&mut self, criteria: SearchCriteria) -> Result<Vec<u32>> {
        let responses = self.run(&Command::UidSearch(criteria)).await?;

        let mut uids = Vec::new();
        for raw in &responses {
            if let Ok(Response::Untagged(Untagged::Search(found))) = parse_response(raw) {
                uids.extend(found);
            }
        }
        Ok(uids)
    }

    /// UID FETCH of full bodies for a UID set.
    ///
    /// Messages the server answers without a UID or body are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error when the command fails.
    pub async fn uid_fetch_full(&mut self, uid_set: &str) -> Result<Vec<FetchedMessage>> {
        let responses = self
            .run(&Command::UidFetchFull {
                uid_set: uid_set.to_string(),
            })
            .await?;

        let mut messages = Vec::new();
        for raw in &responses {
            if let Ok(Response::Untagged(Untagged::Fetch { seq, uid, body })) = parse_response(raw)
            {
                match (uid, body) {
                    (Some(uid), Some(body)) => messages.push(FetchedMessage { uid, body }),
                    _ => tracing::debug!(seq, "skipping incomplete FETCH response"),
                }
            }
        }
        Ok(messages)
    }

    /// Marks the UID set `\Deleted`.
    ///
    /// # Errors
    ///
    /// Returns an error when the command fails.
    pub async fn uid_store_deleted(&mut self, uid_set: &str) -> Result<()> {
        self.run(&Command::UidStoreDeleted {
            uid_set: uid_set.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Expunges `\Deleted` messages; returns expunged sequence numbers.
    ///
    /// # Errors
    ///
    /// Returns an error when the command fails.
    pub async fn expunge(&mut self) -> Result<Vec<u32>> {
        let responses = self.run(&Command::Expunge).await?;

        let mut expunged = Vec::new();
        for raw in &responses {
            if let Ok(Response::Untagged(Untagged::Expunge(seq))) = parse_response(raw) {
                expunged.push(seq);
            }
        }
        Ok(expunged)
    }

    /// NOOP keepalive.
    ///
    /// # Errors
    ///
    /// Returns an error when the command fails.
    pub async fn noop(&mut self) -> Result<()> {
        self.run(&Command::Noop).await?;
        Ok(())
    }

    /// Gracefully disconnects.
    pub async fn logout(mut self) -> Result<()> {
        let _ = self.run(&Command::Logout).await;
        Ok(())
    }
}

fn extract_status(responses: &[Vec<u8>]) -> MailboxStatus {
    let mut status = MailboxStatus::default();
    for raw in responses {
        match parse_response(raw) {
            Ok(Response::Untagged(Untagged::Exists(n))) => status.exists = n,
            Ok(Response::Untagged(Untagged::Recent(n))) => status.recent = n,
            _ => {}
        }
    }
    status
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const GREETING: &[u8] = b"* OK Gimap ready\r\n";

    #[tokio::test]
    async fn login_happy_path() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 LOGIN user@example.com secret\r\n")
            .read(b"A0000 OK user authenticated\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let _authenticated = client.login("user@example.com", "secret").await.unwrap();
    }

    #[tokio::test]
    async fn login_rejection_is_auth_error() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 LOGIN user@example.com bad\r\n")
            .read(b"A0000 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let err = client.login("user@example.com", "bad").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn bye_greeting_is_an_error() {
        let mock = Builder::new().read(b"* BYE overloaded\r\n").build();
        assert!(matches!(
            Client::from_stream(mock).await,
            Err(Error::Bye(_))
        ));
    }

    #[tokio::test]
    async fn select_reports_counts() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 LOGIN u p\r\n")
            .read(b"A0000 OK done\r\n")
            .write(b"A0001 SELECT INBOX\r\n")
            .read(b"* 17 EXISTS\r\n")
            .read(b"* 2 RECENT\r\n")
            .read(b"A0001 OK [READ-WRITE] SELECT done\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let authenticated = client.login("u", "p").await.unwrap();
        let (_selected, status) = authenticated.select("INBOX").await.unwrap();
        assert_eq!(status.exists, 17);
        assert_eq!(status.recent, 2);
    }

    #[tokio::test]
    async fn search_and_fetch_flow() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 LOGIN u p\r\n")
            .read(b"A0000 OK done\r\n")
            .write(b"A0001 SELECT INBOX\r\n")
            .read(b"* 2 EXISTS\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 UID SEARCH ALL\r\n")
            .read(b"* SEARCH 101 102\r\n")
            .read(b"A0002 OK done\r\n")
            .write(b"A0003 UID FETCH 101:102 (UID BODY.PEEK[])\r\n")
            .read(b"* 1 FETCH (UID 101 BODY[] {13}\r\nSubject: one\n)\r\n")
            .read(b"* 2 FETCH (UID 102 BODY[] {13}\r\nSubject: two\n)\r\n")
            .read(b"A0003 OK done\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let authenticated = client.login("u", "p").await.unwrap();
        let (mut selected, _) = authenticated.select("INBOX").await.unwrap();

        let uids = selected.uid_search(SearchCriteria::All).await.unwrap();
        assert_eq!(uids, vec![101, 102]);

        let messages = selected.uid_fetch_full("101:102").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].uid, 101);
        assert_eq!(messages[0].body, b"Subject: one\n");
    }

    #[tokio::test]
    async fn delete_flow() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0000 LOGIN u p\r\n")
            .read(b"A0000 OK done\r\n")
            .write(b"A0001 SELECT INBOX\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 UID STORE 42 +FLAGS.SILENT (\\Deleted)\r\n")
            .read(b"A0002 OK done\r\n")
            .write(b"A0003 EXPUNGE\r\n")
            .read(b"* 7 EXPUNGE\r\n")
            .read(b"A0003 OK done\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let authenticated = client.login("u", "p").await.unwrap();
        let (mut selected, _) = authenticated.select("INBOX").await.unwrap();

        selected.uid_store_deleted("42").await.unwrap();
        assert_eq!(selected.expunge().await.unwrap(), vec![7]);
    }
}

//! Command serialization and tagging.

use std::sync::atomic::{AtomicU32, Ordering};

/// Generates unique command tags ("A0000", "A0001", ...).
#[derive(Debug, Default)]
pub struct TagGenerator {
    counter: AtomicU32,
}

impl TagGenerator {
    /// Generates the next tag.
    #[must_use]
    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("A{n:04}")
    }
}

/// Search criteria for UID SEARCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    /// Every message in the mailbox.
    All,
    /// Messages whose To header contains the given address.
    To(String),
    /// A single UID, to probe for existence.
    Uid(u32),
}

/// The IMAP commands this client issues.
#[derive(Debug, Clone)]
pub enum Command {
    /// LOGIN with plaintext credentials (over TLS).
    Login {
        /// Account username (the address).
        username: String,
        /// Account password.
        password: String,
    },
    /// SELECT a mailbox read-write.
    Select {
        /// Mailbox name, usually "INBOX".
        mailbox: String,
    },
    /// UID SEARCH with the given criteria.
    UidSearch(SearchCriteria),
    /// UID FETCH full bodies (with UID echo) for a UID set.
    UidFetchFull {
        /// Comma/colon formatted UID set, e.g. "100:150" or "3,7,9".
        uid_set: String,
    },
    /// UID STORE +FLAGS (\Deleted) for a UID set.
    UidStoreDeleted {
        /// UID set to mark.
        uid_set: String,
    },
    /// EXPUNGE messages marked \Deleted.
    Expunge,
    /// NOOP keepalive.
    Noop,
    /// Enter IDLE.
    Idle,
    /// Leave IDLE (untagged by design).
    Done,
    /// LOGOUT.
    Logout,
}

impl Command {
    /// Serializes the command with its tag and trailing CRLF.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        if !matches!(self, Self::Done) {
            buf.extend_from_slice(tag.as_bytes());
            buf.push(b' ');
        }

        match self {
            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut buf, username);
                buf.push(b' ');
                write_astring(&mut buf, password);
            }
            Self::Select { mailbox } => {
                buf.extend_from_slice(b"SELECT ");
                write_astring(&mut buf, mailbox);
            }
            Self::UidSearch(criteria) => {
                buf.extend_from_slice(b"UID SEARCH ");
                match criteria {
                    SearchCriteria::All => buf.extend_from_slice(b"ALL"),
                    SearchCriteria::To(addr) => {
                        buf.extend_from_slice(b"TO ");
                        write_astring(&mut buf, addr);
                    }
                    SearchCriteria::Uid(uid) => {
                        buf.extend_from_slice(b"UID ");
                        buf.extend_from_slice(uid.to_string().as_bytes());
                    }
                }
            }
            Self::UidFetchFull { uid_set } => {
                buf.extend_from_slice(b"UID FETCH ");
                buf.extend_from_slice(uid_set.as_bytes());
                buf.extend_from_slice(b" (UID BODY.PEEK[])");
            }
            Self::UidStoreDeleted { uid_set } => {
                buf.extend_from_slice(b"UID STORE ");
                buf.extend_from_slice(uid_set.as_bytes());
                buf.extend_from_slice(b" +FLAGS.SILENT (\\Deleted)");
            }
            Self::Expunge => buf.extend_from_slice(b"EXPUNGE"),
            Self::Noop => buf.extend_from_slice(b"NOOP"),
            Self::Idle => buf.extend_from_slice(b"IDLE"),
            Self::Done => buf.extend_from_slice(b"DONE"),
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// Writes an astring: bare atom when safe, quoted otherwise.
fn write_astring(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() || s.bytes().any(needs_quoting) {
        buf.push(b'"');
        for b in s.bytes() {
            if b == b'"' || b == b'\\' {
                buf.push(b'\\');
            }
            buf.push(b);
        }
        buf.push(b'"');
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

const fn needs_quoting(b: u8) -> bool {
    matches!(b, b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*') || b < 0x20 || b == 0x7F
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_sequential() {
        let generator = TagGenerator::default();
        assert_eq!(generator.next(), "A0000");
        assert_eq!(generator.next(), "A0001");
    }

    #[test]
    fn login_quotes_password() {
        let cmd = Command::Login {
            username: "user@example.com".into(),
            password: "p4ss word".into(),
        };
        assert_eq!(
            cmd.serialize("A0001"),
            b"A0001 LOGIN user@example.com \"p4ss word\"\r\n"
        );
    }

    #[test]
    fn login_escapes_quotes_and_backslashes() {
        let cmd = Command::Login {
            username: "u".into(),
            password: r#"a"b\c"#.into(),
        };
        assert_eq!(cmd.serialize("A0001"), b"A0001 LOGIN u \"a\\\"b\\\\c\"\r\n");
    }

    #[test]
    fn select_inbox() {
        let cmd = Command::Select {
            mailbox: "INBOX".into(),
        };
        assert_eq!(cmd.serialize("A0002"), b"A0002 SELECT INBOX\r\n");
    }

    #[test]
    fn uid_search_to() {
        let cmd = Command::UidSearch(SearchCriteria::To("b+shop@d.com".into()));
        assert_eq!(
            cmd.serialize("A0003"),
            b"A0003 UID SEARCH TO b+shop@d.com\r\n"
        );
    }

    #[test]
    fn uid_fetch_peeks_full_body() {
        let cmd = Command::UidFetchFull {
            uid_set: "100:150".into(),
        };
        assert_eq!(
            cmd.serialize("A0004"),
            b"A0004 UID FETCH 100:150 (UID BODY.PEEK[])\r\n"
        );
    }

    #[test]
    fn store_deleted_is_silent() {
        let cmd = Command::UidStoreDeleted {
            uid_set: "42".into(),
        };
        assert_eq!(
            cmd.serialize("A0005"),
            b"A0005 UID STORE 42 +FLAGS.SILENT (\\Deleted)\r\n"
        );
    }

    #[test]
    fn done_has_no_tag() {
        assert_eq!(Command::Done.serialize("A0006"), b"DONE\r\n");
    }
}

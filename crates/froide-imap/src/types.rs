//! Protocol value types.

use std::fmt;
use std::num::NonZeroU32;

/// Message unique identifier within a mailbox (never zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(NonZeroU32);

impl Uid {
    /// Creates a UID, returning `None` for zero.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        match NonZeroU32::new(value) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tagged completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed.
    Ok,
    /// Command failed.
    No,
    /// Command was malformed.
    Bad,
    /// Server is closing the connection.
    Bye,
}

/// Mailbox counters reported by SELECT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// UIDVALIDITY value, if reported.
    pub uid_validity: Option<u32>,
    /// Predicted next UID, if reported.
    pub uid_next: Option<u32>,
}

/// A message fetched with `BODY.PEEK[]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Message UID.
    pub uid: Uid,
    /// Complete raw RFC 5322 bytes.
    pub raw: Vec<u8>,
}

/// Formats UIDs as a comma separated sequence set.
pub(crate) fn sequence_set(uids: &[Uid]) -> String {
    uids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

//! Connection state markers.

use crate::types::MailboxStatus;

/// Greeting read, not logged in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// Logged in, no mailbox open.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// A mailbox is open. Holds what SELECT reported.
#[derive(Debug, Clone)]
pub struct Selected {
    pub(crate) mailbox: String,
    pub(crate) status: MailboxStatus,
}

impl Selected {
    /// Name of the open mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Counters from SELECT.
    #[must_use]
    pub const fn status(&self) -> &MailboxStatus {
        &self.status
    }

    /// SELECT reported no messages at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.status.exists == 0
    }
}

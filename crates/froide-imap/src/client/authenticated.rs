//! Implementation for the authenticated state.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::states::{Authenticated, Selected};
use super::{Client, quote};
use crate::Result;
use crate::response::apply_select_data;
use crate::types::MailboxStatus;

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Opens `mailbox` read-write.
    pub async fn select(mut self, mailbox: &str) -> Result<Client<S, Selected>> {
        let responses = self.run(&format!("SELECT {}", quote(mailbox))).await?;

        let mut status = MailboxStatus::default();
        for response in &responses {
            apply_select_data(response, &mut status);
        }
        debug!(mailbox, exists = status.exists, "mailbox selected");

        Ok(self.transition(Selected {
            mailbox: mailbox.to_string(),
            status,
        }))
    }
}

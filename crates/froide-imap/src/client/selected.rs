//! Implementation for the selected state.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::Client;
use super::states::Selected;
use crate::Result;
use crate::response::{parse_fetch, parse_search};
use crate::types::{FetchedMessage, Uid, sequence_set};

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs `UID SEARCH <criteria>` and returns the matching UIDs.
    pub async fn uid_search(&mut self, criteria: &str) -> Result<Vec<Uid>> {
        let responses = self.run(&format!("UID SEARCH {criteria}")).await?;
        let uids: Vec<Uid> = responses
            .iter()
            .filter_map(|response| parse_search(response))
            .flatten()
            .collect();
        debug!(criteria, count = uids.len(), "search completed");
        Ok(uids)
    }

    /// Fetches complete messages without setting `\Seen`.
    pub async fn uid_fetch_raw(&mut self, uids: &[Uid]) -> Result<Vec<FetchedMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let command = format!("UID FETCH {} (UID BODY.PEEK[])", sequence_set(uids));
        let responses = self.run(&command).await?;

        let messages: Vec<FetchedMessage> = responses
            .iter()
            .filter_map(|response| parse_fetch(response))
            .collect();
        if messages.len() != uids.len() {
            warn!(
                requested = uids.len(),
                received = messages.len(),
                "server returned fewer messages than requested"
            );
        }
        Ok(messages)
    }

    /// Adds the `\Seen` flag to the given messages.
    pub async fn uid_mark_seen(&mut self, uids: &[Uid]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let command = format!("UID STORE {} +FLAGS.SILENT (\\Seen)", sequence_set(uids));
        self.run(&command).await?;
        Ok(())
    }
}

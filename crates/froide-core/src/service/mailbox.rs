//! Draining unseen mail from the IMAP mailbox.

use froide_imap::{Client, FetchedMessage, NotAuthenticated, Selected, Uid};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::ImapSettings;

/// Fetches unseen messages, one connection per batch.
#[derive(Debug, Clone)]
pub struct MailboxFetcher {
    settings: ImapSettings,
}

impl MailboxFetcher {
    /// Creates a fetcher for the configured mailbox.
    #[must_use]
    pub const fn new(settings: ImapSettings) -> Self {
        Self { settings }
    }

    /// Connects, fetches every unseen message and logs out.
    ///
    /// Messages are fetched with `BODY.PEEK[]`. With `flag_in_process`, the
    /// fetched UIDs are flagged `\Seen` so the next batch skips them.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Imap`] for connection and protocol failures.
    pub async fn fetch_unseen(&self, flag_in_process: bool) -> Result<Vec<FetchedMessage>> {
        let stream = froide_imap::connect(
            &self.settings.host,
            self.settings.port,
            self.settings.security.into(),
        )
        .await?;
        self.fetch_from_stream(stream, flag_in_process).await
    }

    /// Runs one batch over an already connected stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Imap`] for protocol failures.
    pub async fn fetch_from_stream<S>(
        &self,
        stream: S,
        flag_in_process: bool,
    ) -> Result<Vec<FetchedMessage>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let client = Client::<_, NotAuthenticated>::from_stream(stream).await?;
        let client = client
            .login(&self.settings.username, &self.settings.password)
            .await?;
        let mut client = client.select(&self.settings.mailbox).await?;

        let batch = drain(&mut client, flag_in_process).await;
        if let Err(e) = client.logout().await {
            warn!(error = %e, "IMAP logout failed");
        }

        let messages = batch.inspect_err(|e| {
            warn!(error = %e, transient = e.is_transient(), "mailbox batch failed");
        })?;
        info!(
            mailbox = %self.settings.mailbox,
            count = messages.len(),
            "fetched unseen messages"
        );
        Ok(messages)
    }
}

async fn drain<S>(
    client: &mut Client<S, Selected>,
    flag_in_process: bool,
) -> froide_imap::Result<Vec<FetchedMessage>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if client.state().is_empty() {
        debug!(mailbox = client.state().mailbox(), "mailbox is empty");
        return Ok(Vec::new());
    }

    let uids = client.uid_search("UNSEEN").await?;
    if uids.is_empty() {
        debug!("no unseen messages");
        return Ok(Vec::new());
    }

    let messages = client.uid_fetch_raw(&uids).await?;
    if flag_in_process {
        let fetched: Vec<Uid> = messages.iter().map(|message| message.uid).collect();
        client.uid_mark_seen(&fetched).await?;
    }
    Ok(messages)
}

//! Sending outbound messages and tracking what the transport reports.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::status::{DeliveryState, DeliveryStatus, DeliveryStatusRepository};
use super::transport::{OutgoingEmail, Transport, froide_message_id, parse_froide_message_id};
use crate::config::MailConfig;
use crate::db::Database;
use crate::delivery::{Task, TaskDispatcher};
use crate::message::{FoiMessage, MessageId, MessageKind, MessageRepository};
use crate::request::{FoiRequest, RequestRepository};
use crate::{Error, Result};

/// Sends outbound messages through a [`Transport`].
pub struct OutboundService<T> {
    config: Arc<MailConfig>,
    requests: RequestRepository,
    messages: MessageRepository,
    statuses: DeliveryStatusRepository,
    transport: T,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl<T> std::fmt::Debug for OutboundService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundService").finish_non_exhaustive()
    }
}

impl<T: Transport> OutboundService<T> {
    /// Creates a service.
    #[must_use]
    pub fn new(
        db: &Database,
        config: Arc<MailConfig>,
        transport: T,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            config,
            requests: db.requests(),
            messages: db.messages(),
            statuses: db.delivery_statuses(),
            transport,
            dispatcher,
        }
    }

    /// Sends an outbound message unless it is already sent.
    ///
    /// Calling this again for the same message is a new delivery attempt of
    /// that message, never a new message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageNotFound`] for an unknown message,
    /// [`Error::InvalidState`] for a message that is not an outbound email,
    /// and [`Error::Transport`] if the transport refuses the mail. The
    /// failure is recorded in the delivery status before returning.
    pub async fn send_message(&self, id: MessageId) -> Result<DeliveryStatus> {
        let message = self.messages.get(id).await?.ok_or(Error::MessageNotFound(id))?;
        if message.is_response || message.kind != MessageKind::Email {
            return Err(Error::InvalidState(format!(
                "message {id} is not an outbound email"
            )));
        }

        let status = self.statuses.ensure(id).await?;
        if status.status.is_sent() {
            debug!(message_id = %id, "already sent");
            return Ok(status);
        }

        let request = self
            .requests
            .get(message.request_id)
            .await?
            .ok_or(Error::RequestNotFound(message.request_id))?;
        let email = self.outgoing(&request, &message);

        self.statuses
            .set_state(id, DeliveryState::Sending, "handed to transport")
            .await?;

        match self.transport.send(&email).await {
            Ok(()) => {
                self.messages.set_sent(id, true).await?;
                self.dispatcher.dispatch(Task::CheckDeliveryStatus(id));
                info!(message_id = %id, request_id = %request.id, to = %email.to, "message sent");
                self.statuses.ensure(id).await
            }
            Err(e) => {
                warn!(message_id = %id, error = %e, "send failed");
                self.statuses
                    .set_state(id, DeliveryState::Failed, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Retries a message that has not been sent yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the message is already sent, and
    /// any error of [`Self::send_message`].
    pub async fn resend(&self, id: MessageId) -> Result<DeliveryStatus> {
        if self.messages.get(id).await?.is_none() {
            return Err(Error::MessageNotFound(id));
        }
        let status = self.statuses.ensure(id).await?;
        if status.status.is_sent() {
            return Err(Error::InvalidState(format!(
                "message {id} is already {}",
                status.status
            )));
        }

        let retries = self.statuses.increment_retry(id).await?;
        self.messages.set_sent(id, false).await?;
        info!(message_id = %id, retries, "resending message");
        self.send_message(id).await
    }

    /// Records a delivery report from the transport.
    ///
    /// `header` is the `X-Froide-Message-Id` the report refers to. Returns
    /// `None` when it does not name a known message. A message in a
    /// terminal state never goes back to a pending one.
    ///
    /// # Errors
    ///
    /// Returns an error if a database operation fails.
    pub async fn apply_delivery_report(
        &self,
        header: &str,
        state: DeliveryState,
        log: &str,
    ) -> Result<Option<DeliveryStatus>> {
        let Some((request, id)) = parse_froide_message_id(header) else {
            debug!(header, "unparseable delivery report header");
            return Ok(None);
        };
        let Some(message) = self.messages.get(id).await? else {
            debug!(message_id = %id, "delivery report for unknown message");
            return Ok(None);
        };
        if message.request_id != request {
            debug!(message_id = %id, request_id = %request, "delivery report request mismatch");
            return Ok(None);
        }
        if message.is_response || message.kind != MessageKind::Email {
            debug!(message_id = %id, "delivery report for a message that is not an outbound email");
            return Ok(None);
        }

        let current = self.statuses.ensure(id).await?;
        if current.status.is_terminal() && !state.is_terminal() {
            debug!(message_id = %id, current = %current.status, reported = %state, "ignoring downgrade");
            return Ok(Some(current));
        }

        info!(message_id = %id, status = %state, "delivery status updated");
        self.statuses.set_state(id, state, log).await.map(Some)
    }

    fn outgoing(&self, request: &FoiRequest, message: &FoiMessage) -> OutgoingEmail {
        // With a fixed sender every request sends from the mailbox account
        // and replies are steered to the secret address.
        let (from, reply_to) = if self.config.fixed_from_address {
            (
                self.config.mailbox_address.clone(),
                Some(request.secret_address.clone()),
            )
        } else {
            (request.secret_address.clone(), None)
        };
        OutgoingEmail {
            from,
            reply_to,
            to: message.recipient_email.clone(),
            subject: message.subject.clone(),
            body: message.plaintext.clone(),
            froide_message_id: froide_message_id(&self.config.site_url, request.id, message.id),
        }
    }
}

//! Handing outbound mail to a transport.

use std::future::Future;

use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::debug;

use crate::config::{SmtpSecurity, SmtpSettings};
use crate::message::MessageId;
use crate::request::RequestId;
use crate::{Error, Result};

/// Name of the header that ties transport reports back to a message.
pub const FROIDE_MESSAGE_ID_HEADER: &str = "X-Froide-Message-Id";

/// Builds the `X-Froide-Message-Id` value for a message.
#[must_use]
pub fn froide_message_id(site_url: &str, request: RequestId, message: MessageId) -> String {
    format!(
        "{}/a/{request}#message-{message}",
        site_url.trim_end_matches('/')
    )
}

/// Extracts request and message ids from an `X-Froide-Message-Id` value.
#[must_use]
pub fn parse_froide_message_id(value: &str) -> Option<(RequestId, MessageId)> {
    let value = value.trim().trim_start_matches('<').trim_end_matches('>');
    let (_, path) = value.rsplit_once("/a/")?;
    let (request, message) = path.split_once("#message-")?;
    let request = request.trim_end_matches('/');
    if request.is_empty() || message.is_empty() {
        return None;
    }
    Some((
        RequestId::new(request.parse().ok()?),
        MessageId::new(message.parse().ok()?),
    ))
}

/// A plain-text mail ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    /// Envelope and header sender.
    pub from: String,
    /// Where replies should go, when it differs from `from`.
    pub reply_to: Option<String>,
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// Correlation header value.
    pub froide_message_id: String,
}

/// Something that can deliver an [`OutgoingEmail`].
pub trait Transport: Send + Sync {
    /// Hands `email` over for delivery.
    ///
    /// Success means the transport accepted the mail, not that it arrived.
    fn send(&self, email: &OutgoingEmail) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FroideMessageId(String);

impl Header for FroideMessageId {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str(FROIDE_MESSAGE_ID_HEADER)
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// SMTP transport backed by `lettre`.
#[derive(Clone)]
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransport").finish_non_exhaustive()
    }
}

impl SmtpTransport {
    /// Creates a transport from the SMTP settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the relay host is invalid.
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self> {
        let builder = match settings.security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host),
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            }
            SmtpSecurity::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &settings.host,
            )),
        }
        .map_err(|e| Error::Transport(format!("invalid SMTP host {}: {e}", settings.host)))?
        .port(settings.port);

        let builder = if settings.username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
        };

        Ok(Self {
            inner: builder.build(),
        })
    }
}

impl Transport for SmtpTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let message = build_message(email)?;
        self.inner
            .send(message)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        debug!(to = %email.to, froide_message_id = %email.froide_message_id, "handed to SMTP relay");
        Ok(())
    }
}

fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| Error::Transport(format!("invalid address {address:?}: {e}")))
}

fn build_message(email: &OutgoingEmail) -> Result<Message> {
    let mut builder = Message::builder()
        .from(mailbox(&email.from)?)
        .to(mailbox(&email.to)?)
        .subject(email.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .header(FroideMessageId(email.froide_message_id.clone()));
    if let Some(reply_to) = &email.reply_to {
        builder = builder.reply_to(mailbox(reply_to)?);
    }
    builder
        .body(email.body.clone())
        .map_err(|e| Error::Transport(e.to_string()))
}

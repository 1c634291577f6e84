//! Entry points that turn raw mail into messages or quarantine records.

use std::path::Path;
use std::sync::Arc;

use froide_imap::FetchedMessage;
use froide_mime::parse_email;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::mailbox::MailboxFetcher;
use crate::config::MailConfig;
use crate::db::Database;
use crate::deferred::{DeferredId, DeferredRepository, NewDeferred};
use crate::delivery::{
    CommitOutcome, Committer, ContentPolicy, DropReason, Notifier, RoutePlan, Router,
    RoutingOutcome, TaskDispatcher,
};
use crate::message::MessageId;
use crate::request::{RequestId, RequestRepository};
use crate::{Error, Result};

/// What happened to one raw mail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Messages created, with their request.
    pub delivered: Vec<(RequestId, MessageId)>,
    /// Requests that already had this mail.
    pub duplicates: usize,
    /// Quarantine records created.
    pub deferred: Vec<DeferredId>,
    /// Recipients (or whole mails) dropped by policy.
    pub dropped: usize,
}

/// JSON envelope posted by the inbound webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    /// Complete MIME source.
    pub raw: String,
}

/// The inbound mail pipeline.
#[derive(Debug)]
pub struct MailPipeline {
    config: Arc<MailConfig>,
    router: Router,
    committer: Committer,
    requests: RequestRepository,
    deferred: DeferredRepository,
}

impl MailPipeline {
    /// Wires up router and committer over one database.
    #[must_use]
    pub fn new(
        db: &Database,
        config: Arc<MailConfig>,
        policy: Arc<ContentPolicy>,
        notifier: Arc<dyn Notifier>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            router: Router::new(db, Arc::clone(&config)),
            committer: Committer::new(db, Arc::clone(&config), policy, notifier, dispatcher),
            requests: db.requests(),
            deferred: db.deferred(),
            config,
        }
    }

    /// Returns the configuration the pipeline runs with.
    #[must_use]
    pub fn config(&self) -> &MailConfig {
        &self.config
    }

    /// Parses, routes and commits or quarantines one raw mail.
    ///
    /// `manual` marks operator-initiated processing, which bypasses the
    /// drop policy and the public-body gate.
    ///
    /// # Errors
    ///
    /// Returns an error if a database operation fails. Parsing never fails.
    pub async fn process_mail(&self, raw: &[u8], manual: bool) -> Result<ProcessReport> {
        let email = parse_email(raw);
        for check in &email.fails_authenticity {
            warn!(
                sender = %email.from.email,
                method = %check.method,
                result = %check.result,
                "authenticity check failed"
            );
        }

        let mut report = ProcessReport::default();
        let routes = match self.router.route(&email, manual).await? {
            RoutePlan::Drop(reason) => {
                if reason == DropReason::SpamSender {
                    let purged = self
                        .deferred
                        .purge_unclassified_from_sender(&email.from.email)
                        .await?;
                    debug!(sender = %email.from.email, purged, "purged unclassified mail from spam sender");
                }
                debug!(?reason, sender = %email.from.email, "dropped mail");
                report.dropped += 1;
                return Ok(report);
            }
            RoutePlan::Routes(routes) => routes,
        };

        for decision in routes {
            match decision.outcome {
                RoutingOutcome::Deliver {
                    request,
                    public_body,
                } => match self
                    .committer
                    .commit(&email, &request, public_body.as_ref())
                    .await?
                {
                    CommitOutcome::Committed(message) => {
                        report.delivered.push((request.id, message.id));
                    }
                    CommitOutcome::Duplicate => report.duplicates += 1,
                },
                RoutingOutcome::Defer { hint } => {
                    let deferred = self
                        .deferred
                        .create(
                            &NewDeferred::new(&decision.recipient, &email.from.email, raw)
                                .with_hint(hint),
                        )
                        .await?;
                    info!(
                        deferred_id = %deferred.id,
                        recipient = %decision.recipient,
                        sender = %email.from.email,
                        hint = ?hint.map(|id| id.0),
                        "quarantined mail"
                    );
                    report.deferred.push(deferred.id);
                }
                RoutingOutcome::Drop(reason) => {
                    debug!(?reason, recipient = %decision.recipient, "dropped recipient");
                    report.dropped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Processes a webhook body of the form `{"raw": "<MIME source>"}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serde`] for a malformed envelope, otherwise as
    /// [`Self::process_mail`].
    pub async fn process_webhook(&self, body: &str) -> Result<ProcessReport> {
        let payload: WebhookPayload = serde_json::from_str(body)?;
        self.process_mail(payload.raw.as_bytes(), false).await
    }

    /// Drains the mailbox once and returns the number of mails processed.
    ///
    /// # Errors
    ///
    /// Returns IMAP errors from the fetch and the first processing error.
    pub async fn fetch_and_process(
        &self,
        fetcher: &MailboxFetcher,
        flag_in_process: bool,
    ) -> Result<usize> {
        let batch = fetcher.fetch_unseen(flag_in_process).await?;
        self.process_batch(&batch).await
    }

    /// Processes an already fetched batch in mailbox order.
    ///
    /// # Errors
    ///
    /// Returns the first processing error; later mails stay unprocessed.
    pub async fn process_batch(&self, batch: &[FetchedMessage]) -> Result<usize> {
        for message in batch {
            if let Err(e) = self.process_mail(&message.raw, false).await {
                warn!(uid = message.uid.get(), error = %e, "processing failed");
                return Err(e);
            }
        }
        Ok(batch.len())
    }

    /// Replays one `.eml` file with manual semantics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    pub async fn inject_file(&self, path: impl AsRef<Path>) -> Result<ProcessReport> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path).await?;
        info!(path = %path.display(), bytes = raw.len(), "injecting mail");
        self.process_mail(&raw, true).await
    }

    /// Redelivers a quarantined mail to `request_id`.
    ///
    /// The row is marked delivered first, then every occurrence of its
    /// failing recipient in the raw mail is replaced by the request's secret
    /// address and the mail is processed manually.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeferredNotFound`] or [`Error::RequestNotFound`] for
    /// unknown ids, [`Error::Base64`] for a corrupt stored mail, and any
    /// processing error.
    pub async fn redeliver(
        &self,
        deferred_id: DeferredId,
        request_id: RequestId,
    ) -> Result<ProcessReport> {
        let deferred = self
            .deferred
            .get(deferred_id)
            .await?
            .ok_or(Error::DeferredNotFound(deferred_id))?;
        let request = self
            .requests
            .get(request_id)
            .await?
            .ok_or(Error::RequestNotFound(request_id))?;
        let raw = deferred.raw_bytes()?;

        self.deferred.mark_delivered(deferred_id, request_id).await?;
        let raw = retarget(&raw, &deferred.recipient, &request.secret_address);

        info!(
            deferred_id = %deferred_id,
            request_id = %request_id,
            recipient = %deferred.recipient,
            "redelivering quarantined mail"
        );
        self.process_mail(&raw, true).await
    }

    /// Redelivers every pending quarantined mail whose recipient was
    /// redelivered to exactly one request before.
    ///
    /// # Errors
    ///
    /// Returns the first database or processing error.
    pub async fn auto_redeliver_pending(&self) -> Result<usize> {
        let mut count = 0;
        for deferred in self.deferred.list_undelivered().await? {
            if deferred.recipient.is_empty() {
                continue;
            }
            let requests = self.deferred.requests_for_recipient(&deferred.recipient).await?;
            if let [request] = requests.as_slice() {
                self.redeliver(deferred.id, *request).await?;
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Points a raw mail at `target` instead of `recipient`.
///
/// Matching is ASCII case-insensitive. A mail without a recorded recipient
/// gets an `X-Original-To` header instead.
fn retarget(raw: &[u8], recipient: &str, target: &str) -> Vec<u8> {
    if recipient.is_empty() {
        let mut out = format!("X-Original-To: {target}\r\n").into_bytes();
        out.extend_from_slice(raw);
        return out;
    }

    let needle = recipient.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i..].len() >= needle.len() && raw[i..i + needle.len()].eq_ignore_ascii_case(needle)
        {
            out.extend_from_slice(target.as_bytes());
            i += needle.len();
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retarget_replaces_every_occurrence() {
        let raw = b"To: Typo@FOI.example\r\nCc: x@y.example\r\n\r\nsee typo@foi.example";
        let out = retarget(raw, "typo@foi.example", "anna.abc@foi.example");
        assert_eq!(
            out,
            b"To: anna.abc@foi.example\r\nCc: x@y.example\r\n\r\nsee anna.abc@foi.example"
        );
    }

    #[test]
    fn test_retarget_without_recipient() {
        let out = retarget(b"Subject: x\r\n\r\nbody", "", "anna.abc@foi.example");
        assert!(out.starts_with(b"X-Original-To: anna.abc@foi.example\r\nSubject: x"));
    }

    #[test]
    fn test_webhook_payload() {
        let payload: WebhookPayload =
            serde_json::from_str(r#"{"raw": "Subject: hi\r\n\r\nbody"}"#).unwrap();
        assert_eq!(payload.raw, "Subject: hi\r\n\r\nbody");
    }
}

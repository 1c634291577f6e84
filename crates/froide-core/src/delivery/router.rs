//! Decides where an inbound mail goes.
//!
//! Routing happens in four steps:
//!
//! 1. Collect every recipient on an FOI domain and normalize it onto the
//!    canonical domain. No candidates at all means one quarantine record.
//! 2. Drop the whole mail if it went only to the shared mailbox account
//!    (unless every request sends from it) or comes from a sender flagged
//!    as spam.
//! 3. Resolve each distinct candidate to a request, falling back to the
//!    quarantine history, and find the sender's public body.
//! 4. Apply the policy gate: closed requests drop, known public bodies and
//!    bounces deliver, everything else is quarantined with a hint.
//!
//! A mail is delivered at most once per request however many of its
//! recipients point there. Manual redelivery skips steps 2 and 4.

use std::collections::HashSet;
use std::sync::Arc;

use froide_mime::ParsedEmail;
use tracing::debug;

use crate::Result;
use crate::config::MailConfig;
use crate::db::Database;
use crate::deferred::DeferredRepository;
use crate::publicbody::{PublicBody, PublicBodyRepository};
use crate::request::{FoiRequest, RequestId, RequestRepository, resolve_request_from_email};

/// Why a mail or recipient was dropped without a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Mail addressed only to the shared mailbox account.
    MailboxAccount,
    /// The sender was flagged as spam before.
    SpamSender,
    /// The request no longer accepts mail.
    ClosedRequest,
}

/// What happens to one recipient of a mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingOutcome {
    /// Commit to `request`.
    Deliver {
        /// Target request.
        request: FoiRequest,
        /// Public body the sender writes for, if known.
        public_body: Option<PublicBody>,
    },
    /// Quarantine for an operator.
    Defer {
        /// Request the mail probably belongs to.
        hint: Option<RequestId>,
    },
    /// Discard silently.
    Drop(DropReason),
}

/// Routing decision for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    /// The recipient as written in the mail (not normalized).
    pub recipient: String,
    /// What to do with it.
    pub outcome: RoutingOutcome,
}

/// Routing result for a whole mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePlan {
    /// Discard the mail entirely.
    Drop(DropReason),
    /// Per-recipient decisions, in header order.
    Routes(Vec<RouteDecision>),
}

/// The routing decision engine.
#[derive(Debug, Clone)]
pub struct Router {
    config: Arc<MailConfig>,
    requests: RequestRepository,
    deferred: DeferredRepository,
    public_bodies: PublicBodyRepository,
}

impl Router {
    /// Creates a router over the given database.
    #[must_use]
    pub fn new(db: &Database, config: Arc<MailConfig>) -> Self {
        Self {
            config,
            requests: db.requests(),
            deferred: db.deferred(),
            public_bodies: db.public_bodies(),
        }
    }

    /// Routes one parsed mail. Reads the database but never writes.
    ///
    /// # Errors
    ///
    /// Returns an error if a database query fails.
    pub async fn route(&self, email: &ParsedEmail, manual: bool) -> Result<RoutePlan> {
        let candidates = self.candidates(email);
        if candidates.is_empty() {
            let recipient = email.to.first().map(|a| a.email.clone()).unwrap_or_default();
            debug!(recipient = %recipient, "no FOI recipients");
            return Ok(RoutePlan::Routes(vec![RouteDecision {
                recipient,
                outcome: RoutingOutcome::Defer { hint: None },
            }]));
        }

        if !manual && let Some(reason) = self.drop_reason(email, &candidates).await? {
            debug!(sender = %email.from.email, ?reason, "dropping mail");
            return Ok(RoutePlan::Drop(reason));
        }

        // The mailbox account itself is never a delivery target, not even
        // when copied on a reply to a secret address.
        let candidates: Vec<_> = candidates
            .into_iter()
            .filter(|(original, normalized)| {
                let skip = self.is_mailbox_account(normalized);
                if skip {
                    debug!(recipient = %original, "skipping mailbox account recipient");
                }
                !skip
            })
            .collect();
        if candidates.is_empty() {
            return Ok(RoutePlan::Drop(DropReason::MailboxAccount));
        }

        let mut seen_addresses = HashSet::new();
        let mut seen_requests = HashSet::new();
        let mut decisions = Vec::new();

        for (original, normalized) in candidates {
            if !seen_addresses.insert(normalized.clone()) {
                continue;
            }
            let outcome = self.resolve(email, &original, &normalized, manual).await?;
            if let RoutingOutcome::Deliver { request, .. } = &outcome
                && !seen_requests.insert(request.id)
            {
                debug!(request_id = %request.id, recipient = %original, "already delivered to this request");
                continue;
            }
            debug!(recipient = %original, ?outcome, "routed recipient");
            decisions.push(RouteDecision {
                recipient: original,
                outcome,
            });
        }

        Ok(RoutePlan::Routes(decisions))
    }

    /// FOI-domain recipients as `(original, normalized)` pairs.
    fn candidates(&self, email: &ParsedEmail) -> Vec<(String, String)> {
        email
            .all_recipients()
            .filter_map(|address| {
                self.config
                    .normalize_address(&address.email)
                    .map(|normalized| (address.email.clone(), normalized))
            })
            .collect()
    }

    /// Mail to the mailbox account is only routable in fixed-from mode.
    fn is_mailbox_account(&self, normalized: &str) -> bool {
        if self.config.fixed_from_address {
            return false;
        }
        self.config
            .normalize_address(&self.config.mailbox_address)
            .map_or_else(
                || normalized.eq_ignore_ascii_case(&self.config.mailbox_address),
                |mailbox| mailbox == normalized,
            )
    }

    async fn drop_reason(
        &self,
        email: &ParsedEmail,
        candidates: &[(String, String)],
    ) -> Result<Option<DropReason>> {
        if candidates
            .iter()
            .all(|(_, normalized)| self.is_mailbox_account(normalized))
        {
            return Ok(Some(DropReason::MailboxAccount));
        }

        if self.deferred.has_spam_sender(&email.from.email).await? {
            return Ok(Some(DropReason::SpamSender));
        }

        Ok(None)
    }

    async fn resolve(
        &self,
        email: &ParsedEmail,
        original: &str,
        normalized: &str,
        manual: bool,
    ) -> Result<RoutingOutcome> {
        let request = match resolve_request_from_email(&self.requests, normalized).await? {
            Some(request) => request,
            None => match self.request_from_history(original).await? {
                Some(request) => request,
                None => return Ok(RoutingOutcome::Defer { hint: None }),
            },
        };

        let public_body = self
            .public_bodies
            .resolve_for_sender(&email.from.email, &request, true)
            .await?;

        if manual {
            return Ok(RoutingOutcome::Deliver {
                request,
                public_body,
            });
        }
        if request.closed {
            return Ok(RoutingOutcome::Drop(DropReason::ClosedRequest));
        }
        if public_body.is_some() || email.is_bounce() {
            return Ok(RoutingOutcome::Deliver {
                request,
                public_body,
            });
        }
        Ok(RoutingOutcome::Defer {
            hint: Some(request.id),
        })
    }

    /// Self-healing lookup: earlier quarantined mail to `recipient` that was
    /// redelivered to exactly one request.
    async fn request_from_history(&self, recipient: &str) -> Result<Option<FoiRequest>> {
        match self.deferred.requests_for_recipient(recipient).await?.as_slice() {
            [id] => {
                debug!(recipient, request_id = %id, "resolved from deferred history");
                self.requests.get(*id).await
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use froide_mime::Address;

    use super::*;
    use crate::deferred::NewDeferred;
    use crate::request::NewRequest;

    struct Fixture {
        db: Database,
        router: Router,
        request: FoiRequest,
    }

    async fn fixture(fixed_from: bool) -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let mut config = MailConfig::for_domains(&["foi.example", "old-foi.example"]);
        config.fixed_from_address = fixed_from;
        let body = db
            .public_bodies()
            .create("Amt", "post@amt.example", None)
            .await
            .unwrap();
        let request = db
            .requests()
            .create(
                &NewRequest::new("Akten", "Anna")
                    .with_public_body(body.id)
                    .with_secret_address("anna.abc@foi.example"),
                "foi.example",
            )
            .await
            .unwrap();
        let router = Router::new(&db, Arc::new(config));
        Fixture { db, router, request }
    }

    fn email(from: &str, to: &[&str]) -> ParsedEmail {
        ParsedEmail {
            from: Address::new("", from),
            to: to.iter().map(|a| Address::new("", *a)).collect(),
            ..ParsedEmail::default()
        }
    }

    fn decisions(plan: RoutePlan) -> Vec<RouteDecision> {
        match plan {
            RoutePlan::Routes(decisions) => decisions,
            RoutePlan::Drop(reason) => panic!("unexpected drop: {reason:?}"),
        }
    }

    #[tokio::test]
    async fn test_alternate_domain_delivers_once() {
        let f = fixture(false).await;
        let mail = email(
            "post@amt.example",
            &["anna.abc@foi.example", "Anna.ABC@old-foi.example", "other@elsewhere.example"],
        );

        let routes = decisions(f.router.route(&mail, false).await.unwrap());
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].recipient, "anna.abc@foi.example");
        assert!(matches!(
            &routes[0].outcome,
            RoutingOutcome::Deliver { request, public_body: Some(_) } if request.id == f.request.id
        ));
    }

    #[tokio::test]
    async fn test_no_foi_recipient_quarantines_first_to() {
        let f = fixture(false).await;
        let mail = email("post@amt.example", &["someone@elsewhere.example"]);

        let routes = decisions(f.router.route(&mail, false).await.unwrap());
        assert_eq!(
            routes,
            vec![RouteDecision {
                recipient: "someone@elsewhere.example".into(),
                outcome: RoutingOutcome::Defer { hint: None },
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_sender_deferred_with_hint() {
        let f = fixture(false).await;
        let mail = email("random@gmail.example", &["anna.abc@foi.example"]);

        let routes = decisions(f.router.route(&mail, false).await.unwrap());
        assert_eq!(
            routes[0].outcome,
            RoutingOutcome::Defer {
                hint: Some(f.request.id)
            }
        );

        // Manual redelivery ignores the gate.
        let routes = decisions(f.router.route(&mail, true).await.unwrap());
        assert!(matches!(routes[0].outcome, RoutingOutcome::Deliver { .. }));
    }

    #[tokio::test]
    async fn test_bounce_delivers_without_public_body() {
        let f = fixture(false).await;
        let mut mail = email("mailer-daemon@relay.example", &["anna.abc@foi.example"]);
        mail.bounce_info.is_bounce = true;

        let routes = decisions(f.router.route(&mail, false).await.unwrap());
        assert!(matches!(
            routes[0].outcome,
            RoutingOutcome::Deliver { public_body: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_closed_request_dropped_unless_manual() {
        let f = fixture(false).await;
        f.db.requests().set_closed(f.request.id, true).await.unwrap();
        let mail = email("post@amt.example", &["anna.abc@foi.example"]);

        let routes = decisions(f.router.route(&mail, false).await.unwrap());
        assert_eq!(routes[0].outcome, RoutingOutcome::Drop(DropReason::ClosedRequest));

        let routes = decisions(f.router.route(&mail, true).await.unwrap());
        assert!(matches!(routes[0].outcome, RoutingOutcome::Deliver { .. }));
    }

    #[tokio::test]
    async fn test_mailbox_account_drop_depends_on_fixed_from() {
        let mail = email("post@amt.example", &["mail@foi.example"]);

        let f = fixture(false).await;
        assert_eq!(
            f.router.route(&mail, false).await.unwrap(),
            RoutePlan::Drop(DropReason::MailboxAccount)
        );

        let f = fixture(true).await;
        let routes = decisions(f.router.route(&mail, false).await.unwrap());
        assert_eq!(routes[0].outcome, RoutingOutcome::Defer { hint: None });
    }

    #[tokio::test]
    async fn test_mailbox_account_in_cc_is_skipped() {
        let f = fixture(false).await;
        let mut mail = email("post@amt.example", &["anna.abc@foi.example"]);
        mail.cc = vec![Address::new("", "mail@foi.example")];

        let routes = decisions(f.router.route(&mail, false).await.unwrap());
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].recipient, "anna.abc@foi.example");

        // Manual replays skip it too.
        let routes = decisions(f.router.route(&mail, true).await.unwrap());
        assert_eq!(routes.len(), 1);
    }

    #[tokio::test]
    async fn test_spam_sender_dropped() {
        let f = fixture(false).await;
        let row = f
            .db
            .deferred()
            .create(&NewDeferred::new("x@foi.example", "post@amt.example", b"m"))
            .await
            .unwrap();
        f.db.deferred().mark_spam(row.id).await.unwrap();

        let mail = email("post@amt.example", &["anna.abc@foi.example"]);
        assert_eq!(
            f.router.route(&mail, false).await.unwrap(),
            RoutePlan::Drop(DropReason::SpamSender)
        );
    }

    #[tokio::test]
    async fn test_history_resolution() {
        let f = fixture(false).await;
        let deferred = f.db.deferred();
        for _ in 0..3 {
            let row = deferred
                .create(&NewDeferred::new("typo@foi.example", "post@amt.example", b"m"))
                .await
                .unwrap();
            deferred.mark_delivered(row.id, f.request.id).await.unwrap();
        }

        let mail = email("post@amt.example", &["typo@foi.example"]);
        let routes = decisions(f.router.route(&mail, false).await.unwrap());
        assert!(matches!(
            &routes[0].outcome,
            RoutingOutcome::Deliver { request, .. } if request.id == f.request.id
        ));
    }
}

//! End-to-end tests of the inbound pipeline against an in-memory database.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use froide_core::deferred::NewDeferred;
use froide_core::delivery::ChannelDispatcher;
use froide_core::message::{NewMessage, ProblemKind, tags};
use froide_core::request::legacy_address;
use froide_core::{
    ContentPolicy, Database, FoiMessage, FoiRequest, MailConfig, MailPipeline, NewRequest,
    Notifier, PublicBody, RequestId, RequestStatus, TracingNotifier,
};
use froide_imap::{FetchedMessage, Uid};

const DATE: &str = "Fri, 01 Mar 2024 10:00:00 +0000";

struct Harness {
    db: Database,
    pipeline: MailPipeline,
    body: PublicBody,
    request: FoiRequest,
}

async fn harness_with(domains: &[&str], notifier: Arc<dyn Notifier>) -> Harness {
    let db = Database::in_memory().await.unwrap();
    let config = Arc::new(MailConfig::for_domains(domains));
    let body = db
        .public_bodies()
        .create("Amt", "post@amt.example", None)
        .await
        .unwrap();
    let request = db
        .requests()
        .create(
            &NewRequest::new("Akten", "Anna Müller")
                .with_public_body(body.id)
                .with_secret_address("anna.abc@foi.example"),
            config.primary_domain(),
        )
        .await
        .unwrap();
    let (dispatcher, _tasks) = ChannelDispatcher::channel();
    let pipeline = MailPipeline::new(
        &db,
        config,
        Arc::new(ContentPolicy::new()),
        notifier,
        Arc::new(dispatcher),
    );
    Harness {
        db,
        pipeline,
        body,
        request,
    }
}

async fn harness() -> Harness {
    harness_with(&["foi.example", "old-foi.example"], Arc::new(TracingNotifier)).await
}

fn mail(from: &str, to: &str, message_id: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: {to}\r\n\
         Subject: Re: Akten\r\n\
         Message-ID: {message_id}\r\n\
         Date: {DATE}\r\n\
         \r\n\
         Sehr geehrte Frau Müller,\r\nanbei die Akten.\r\n"
    )
    .into_bytes()
}

async fn messages(h: &Harness, request: RequestId) -> Vec<FoiMessage> {
    h.db.messages().list_for_request(request).await.unwrap()
}

#[tokio::test]
async fn processing_twice_creates_one_message() {
    let h = harness().await;
    let raw = mail("Amt <post@amt.example>", "anna.abc@foi.example", "<1@amt.example>");

    let first = h.pipeline.process_mail(&raw, false).await.unwrap();
    assert_eq!(first.delivered.len(), 1);

    let second = h.pipeline.process_mail(&raw, false).await.unwrap();
    assert!(second.delivered.is_empty());
    assert_eq!(second.duplicates, 1);
    assert_eq!(messages(&h, h.request.id).await.len(), 1);
}

#[tokio::test]
async fn recipients_on_several_domains_deliver_once() {
    let h = harness().await;
    let raw = format!(
        "From: post@amt.example\r\n\
         To: anna.abc@foi.example\r\n\
         Cc: ANNA.ABC@old-foi.example\r\n\
         Resent-To: anna.abc@foi.example\r\n\
         Message-ID: <2@amt.example>\r\n\
         Date: {DATE}\r\n\
         \r\n\
         body\r\n"
    );

    let report = h.pipeline.process_mail(raw.as_bytes(), false).await.unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert!(report.deferred.is_empty());
    assert_eq!(messages(&h, h.request.id).await.len(), 1);
}

#[tokio::test]
async fn mailbox_account_in_cc_is_not_quarantined() {
    let h = harness().await;
    let raw = format!(
        "From: post@amt.example\r\n\
         To: anna.abc@foi.example\r\n\
         Cc: mail@foi.example\r\n\
         Message-ID: <21@amt.example>\r\n\
         Date: {DATE}\r\n\
         \r\n\
         body\r\n"
    );

    let report = h.pipeline.process_mail(raw.as_bytes(), false).await.unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert!(report.deferred.is_empty());
    assert_eq!(h.db.deferred().count().await.unwrap(), 0);
}

#[tokio::test]
async fn two_addresses_of_one_request_deliver_once() {
    let h = harness().await;
    let legacy = legacy_address(h.request.id, "foi.example");
    let raw = mail(
        "post@amt.example",
        &format!("anna.abc@foi.example, {legacy}"),
        "<22@amt.example>",
    );

    let report = h.pipeline.process_mail(&raw, false).await.unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert_eq!(report.duplicates, 0);
    assert!(report.deferred.is_empty());
    assert_eq!(messages(&h, h.request.id).await.len(), 1);
}

#[tokio::test]
async fn redelivered_recipient_heals_future_mail() {
    let h = harness().await;
    let first = h
        .pipeline
        .process_mail(&mail("post@amt.example", "typo@foi.example", "<3@amt.example>"), false)
        .await
        .unwrap();
    assert_eq!(first.deferred.len(), 1);

    let redelivered = h
        .pipeline
        .redeliver(first.deferred[0], h.request.id)
        .await
        .unwrap();
    assert_eq!(redelivered.delivered.len(), 1);
    let message = &messages(&h, h.request.id).await[0];
    assert_eq!(message.recipient_email, "anna.abc@foi.example");

    let next = h
        .pipeline
        .process_mail(&mail("post@amt.example", "typo@foi.example", "<4@amt.example>"), false)
        .await
        .unwrap();
    assert_eq!(next.delivered.len(), 1);
    assert_eq!(next.delivered[0].0, h.request.id);
    assert_eq!(messages(&h, h.request.id).await.len(), 2);
}

#[tokio::test]
async fn ambiguous_history_quarantines() {
    let h = harness().await;
    let other = h
        .db
        .requests()
        .create(
            &NewRequest::new("Mehr Akten", "Anna Müller").with_public_body(h.body.id),
            "foi.example",
        )
        .await
        .unwrap();

    let mut pending = Vec::new();
    for id in ["<5@amt.example>", "<6@amt.example>"] {
        let report = h
            .pipeline
            .process_mail(&mail("post@amt.example", "typo@foi.example", id), false)
            .await
            .unwrap();
        pending.push(report.deferred[0]);
    }
    h.pipeline.redeliver(pending[0], h.request.id).await.unwrap();
    h.pipeline.redeliver(pending[1], other.id).await.unwrap();

    let report = h
        .pipeline
        .process_mail(&mail("post@amt.example", "typo@foi.example", "<7@amt.example>"), false)
        .await
        .unwrap();
    assert!(report.delivered.is_empty());
    assert_eq!(report.deferred.len(), 1);
    let deferred = h.db.deferred().get(report.deferred[0]).await.unwrap().unwrap();
    assert_eq!(deferred.hint_request_id, None);
}

#[tokio::test]
async fn closed_request_drops_silently() {
    let h = harness().await;
    h.db.requests().set_closed(h.request.id, true).await.unwrap();

    let report = h
        .pipeline
        .process_mail(&mail("post@amt.example", "anna.abc@foi.example", "<8@amt.example>"), false)
        .await
        .unwrap();
    assert_eq!(report.dropped, 1);
    assert!(messages(&h, h.request.id).await.is_empty());
    assert_eq!(h.db.deferred().count().await.unwrap(), 0);
}

#[tokio::test]
async fn spam_sender_drops_and_purges_unclassified() {
    let h = harness().await;
    let deferred = h.db.deferred();
    let flagged = deferred
        .create(&NewDeferred::new("x@foi.example", "spam@spam.example", b"old"))
        .await
        .unwrap();
    deferred.mark_spam(flagged.id).await.unwrap();
    deferred
        .create(&NewDeferred::new("y@foi.example", "spam@spam.example", b"unclassified"))
        .await
        .unwrap();

    let report = h
        .pipeline
        .process_mail(&mail("spam@spam.example", "anna.abc@foi.example", "<9@spam.example>"), false)
        .await
        .unwrap();
    assert_eq!(report.dropped, 1);
    assert!(messages(&h, h.request.id).await.is_empty());
    assert_eq!(deferred.count().await.unwrap(), 1);
}

#[tokio::test]
async fn mailbox_account_mail_is_dropped() {
    let h = harness().await;
    let report = h
        .pipeline
        .process_mail(&mail("post@amt.example", "mail@foi.example", "<10@amt.example>"), false)
        .await
        .unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(h.db.deferred().count().await.unwrap(), 0);
}

#[tokio::test]
async fn legacy_addresses_resolve_and_corrupt_ones_quarantine() {
    let h = harness().await;
    let address = legacy_address(h.request.id, "foi.example");

    let report = h
        .pipeline
        .process_mail(&mail("post@amt.example", &address, "<11@amt.example>"), false)
        .await
        .unwrap();
    assert_eq!(report.delivered.len(), 1);

    let (name, _) = address.rsplit_once('_').unwrap();
    let corrupted = format!("{name}_4x2@foi.example");
    let report = h
        .pipeline
        .process_mail(&mail("post@amt.example", &corrupted, "<12@amt.example>"), false)
        .await
        .unwrap();
    assert!(report.delivered.is_empty());
    assert_eq!(report.deferred.len(), 1);
}

#[tokio::test]
async fn reply_never_precedes_first_outbound_message() {
    let h = harness().await;
    let sent_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    h.db.messages()
        .create(&NewMessage::outbound(h.request.id, "post@amt.example").at(sent_at))
        .await
        .unwrap();

    let report = h
        .pipeline
        .process_mail(&mail("post@amt.example", "anna.abc@foi.example", "<13@amt.example>"), false)
        .await
        .unwrap();
    let reply = h.db.messages().get(report.delivered[0].1).await.unwrap().unwrap();
    assert_eq!(reply.timestamp, sent_at + chrono::TimeDelta::seconds(1));
}

#[tokio::test]
async fn reply_at_same_time_as_first_outbound_message_moves_after_it() {
    let h = harness().await;
    let sent_at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
    h.db.messages()
        .create(&NewMessage::outbound(h.request.id, "post@amt.example").at(sent_at))
        .await
        .unwrap();

    let report = h
        .pipeline
        .process_mail(&mail("post@amt.example", "anna.abc@foi.example", "<14@amt.example>"), false)
        .await
        .unwrap();
    let reply = h.db.messages().get(report.delivered[0].1).await.unwrap().unwrap();
    assert_eq!(reply.timestamp, sent_at + chrono::TimeDelta::seconds(1));
}

fn bounce(recipient: &str, message_id: &str) -> Vec<u8> {
    format!(
        "From: MAILER-DAEMON@relay.example\r\n\
         To: anna.abc@foi.example\r\n\
         Subject: Undelivered Mail Returned to Sender\r\n\
         Message-ID: {message_id}\r\n\
         Date: {DATE}\r\n\
         \r\n\
         <{recipient}>: host mx.amt.example said: 550 5.1.1 User unknown\r\n"
    )
    .into_bytes()
}

#[tokio::test]
async fn bounce_links_to_original_outbound_message() {
    let h = harness().await;
    let store = h.db.messages();
    let at = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
    store
        .create(&NewMessage::outbound(h.request.id, "other@amt.example").at(at))
        .await
        .unwrap();
    let original = store
        .create(
            &NewMessage::outbound(h.request.id, "Post@Amt.example")
                .at(at + chrono::TimeDelta::hours(1)),
        )
        .await
        .unwrap()
        .unwrap();

    let report = h
        .pipeline
        .process_mail(&bounce("post@amt.example", "<b1@relay.example>"), false)
        .await
        .unwrap();
    let message = store.get(report.delivered[0].1).await.unwrap().unwrap();

    assert!(message.content_hidden);
    assert_eq!(message.original_id, Some(original.id));
    assert_eq!(store.tags(message.id).await.unwrap(), vec![tags::BOUNCE]);
    assert_eq!(store.tags(original.id).await.unwrap(), vec![tags::BOUNCED]);
    let problems = store.problem_reports(original.id).await.unwrap();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].kind, ProblemKind::BouncePublicBody);

    let request = h.db.requests().get(h.request.id).await.unwrap().unwrap();
    assert_eq!(request.status, h.request.status);
}

#[tokio::test]
async fn bounce_without_matching_outbound_stays_unlinked() {
    let h = harness().await;
    let store = h.db.messages();
    let outbound = store
        .create(&NewMessage::outbound(h.request.id, "post@amt.example"))
        .await
        .unwrap()
        .unwrap();

    let report = h
        .pipeline
        .process_mail(&bounce("unknown@elsewhere.example", "<b2@relay.example>"), false)
        .await
        .unwrap();
    let message = store.get(report.delivered[0].1).await.unwrap().unwrap();

    assert_eq!(message.original_id, None);
    assert_eq!(store.tags(message.id).await.unwrap(), vec![tags::BOUNCE]);
    assert!(store.tags(outbound.id).await.unwrap().is_empty());
    assert!(store.problem_reports(outbound.id).await.unwrap().is_empty());
}

#[derive(Default)]
struct RecordingNotifier {
    committed: Mutex<Vec<RequestId>>,
}

impl Notifier for RecordingNotifier {
    fn on_message_committed(&self, request: &FoiRequest, _message: &FoiMessage) {
        self.committed.lock().unwrap().push(request.id);
    }
}

#[tokio::test]
async fn current_scheme_delivery_end_to_end() {
    let notifier = Arc::new(RecordingNotifier::default());
    let h = harness_with(&["fragdenstaat.de"], notifier.clone()).await;

    // The harness request is #1; fill up to #41.
    for i in 2..42 {
        h.db.requests()
            .create(&NewRequest::new(format!("Anfrage {i}"), "Max"), "fragdenstaat.de")
            .await
            .unwrap();
    }
    let request = h
        .db
        .requests()
        .create(
            &NewRequest::new("Gutachten", "Stefan Wehrmeyer")
                .with_public_body(h.body.id)
                .with_secret_address("sw+ab12cd34ef@fragdenstaat.de"),
            "fragdenstaat.de",
        )
        .await
        .unwrap();
    assert_eq!(request.id, RequestId::new(42));

    let raw = mail(
        "Poststelle <post@amt.example>",
        "sw+ab12cd34ef@fragdenstaat.de",
        "<e2e@amt.example>",
    );
    let report = h.pipeline.process_mail(&raw, false).await.unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert_eq!(report.delivered[0].0, RequestId::new(42));

    let message = h.db.messages().get(report.delivered[0].1).await.unwrap().unwrap();
    assert!(!message.content_hidden);
    assert!(message.is_response);
    assert_eq!(message.sender_public_body_id, Some(h.body.id));
    assert_eq!(message.recipient_email, "sw+ab12cd34ef@fragdenstaat.de");
    assert_eq!(message.subject, "Re: Akten");

    let request = h.db.requests().get(request.id).await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::AwaitingClassification);
    assert_eq!(*notifier.committed.lock().unwrap(), vec![RequestId::new(42)]);
}

#[tokio::test]
async fn mail_without_foi_recipient_is_quarantined_once() {
    let h = harness().await;
    let raw = format!(
        "From: post@amt.example\r\n\
         To: someone@elsewhere.example, other@elsewhere.example\r\n\
         Message-ID: <14@amt.example>\r\n\
         \r\n\
         body\r\n"
    );

    let report = h.pipeline.process_mail(raw.as_bytes(), false).await.unwrap();
    assert_eq!(report.deferred.len(), 1);
    let deferred = h.db.deferred().get(report.deferred[0]).await.unwrap().unwrap();
    assert_eq!(deferred.recipient, "someone@elsewhere.example");
    assert_eq!(deferred.sender, "post@amt.example");
    assert_eq!(deferred.raw_bytes().unwrap(), raw.as_bytes());
}

#[tokio::test]
async fn unknown_sender_is_quarantined_with_hint() {
    let h = harness().await;
    let report = h
        .pipeline
        .process_mail(&mail("someone@gmail.example", "anna.abc@foi.example", "<15@g>"), false)
        .await
        .unwrap();
    let deferred = h.db.deferred().get(report.deferred[0]).await.unwrap().unwrap();
    assert_eq!(deferred.hint_request_id, Some(h.request.id));
    assert_eq!(deferred.recipient, "anna.abc@foi.example");
}

#[tokio::test]
async fn webhook_and_batch_entry_points() {
    let h = harness().await;
    let raw = String::from_utf8(mail("post@amt.example", "anna.abc@foi.example", "<16@amt.example>"))
        .unwrap();
    let body = serde_json::json!({ "raw": raw }).to_string();

    let report = h.pipeline.process_webhook(&body).await.unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert!(h.pipeline.process_webhook("{\"mail\": 1}").await.is_err());

    let batch = vec![
        FetchedMessage {
            uid: Uid::new(1).unwrap(),
            raw: mail("post@amt.example", "anna.abc@foi.example", "<17@amt.example>"),
        },
        FetchedMessage {
            uid: Uid::new(2).unwrap(),
            raw: mail("post@amt.example", "anna.abc@foi.example", "<16@amt.example>"),
        },
    ];
    assert_eq!(h.pipeline.process_batch(&batch).await.unwrap(), 2);
    assert_eq!(messages(&h, h.request.id).await.len(), 2);
}

#[tokio::test]
async fn injected_file_bypasses_public_body_gate() {
    let h = harness().await;
    let path = std::env::temp_dir().join(format!("froide-inject-{}.eml", std::process::id()));
    tokio::fs::write(
        &path,
        mail("someone@gmail.example", "anna.abc@foi.example", "<18@g>"),
    )
    .await
    .unwrap();

    let report = h.pipeline.inject_file(&path).await.unwrap();
    tokio::fs::remove_file(&path).await.unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert!(report.deferred.is_empty());
}

#[tokio::test]
async fn pending_mail_redelivers_once_history_exists() {
    let h = harness().await;
    let first = h
        .pipeline
        .process_mail(&mail("post@amt.example", "typo@foi.example", "<19@amt.example>"), false)
        .await
        .unwrap();
    let second = h
        .pipeline
        .process_mail(&mail("post@amt.example", "typo@foi.example", "<20@amt.example>"), false)
        .await
        .unwrap();
    assert_eq!(second.deferred.len(), 1);

    assert_eq!(h.pipeline.auto_redeliver_pending().await.unwrap(), 0);
    h.pipeline
        .redeliver(first.deferred[0], h.request.id)
        .await
        .unwrap();
    assert_eq!(h.pipeline.auto_redeliver_pending().await.unwrap(), 1);

    assert_eq!(messages(&h, h.request.id).await.len(), 2);
    assert!(h.db.deferred().list_undelivered().await.unwrap().is_empty());
}

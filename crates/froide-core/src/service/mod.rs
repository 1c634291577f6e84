//! Operational entry points: mailbox polling, webhook and file injection,
//! and redelivery of quarantined mail.

mod mailbox;
mod pipeline;

pub use mailbox::MailboxFetcher;
pub use pipeline::{MailPipeline, ProcessReport, WebhookPayload};

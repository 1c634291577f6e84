//! # froide-core
//!
//! Routing, persistence and delivery logic for the Froide FOI mail pipeline.
//!
//! This crate provides:
//! - Secret reply addresses for requests, current and legacy schemes
//! - Delivery routing of inbound mail to requests, with quarantine
//! - Committing mail to request timelines (dedupe, bounces, attachments)
//! - Redelivery of quarantined mail
//! - Outbound sending with a delivery-status state machine
//! - Local storage (`SQLite`)
//! - IMAP mailbox polling
//!
//! Everything that is not a mail goes through a [`Database`] handle and is
//! configured by one [`MailConfig`] loaded at startup.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
mod db;
pub mod deferred;
pub mod delivery;
mod error;
mod ids;
pub mod message;
pub mod outbound;
pub mod publicbody;
pub mod request;
pub mod service;

pub use config::MailConfig;
pub use db::Database;
pub use deferred::{DeferredId, DeferredMessage, DeferredRepository};
pub use delivery::{
    ChannelDispatcher, CommitOutcome, Committer, ContentPolicy, Notifier, RoutePlan, Router,
    RoutingOutcome, Task, TaskDispatcher, TracingNotifier,
};
pub use error::{Error, Result};
pub use message::{FoiMessage, MessageId, MessageRepository};
pub use outbound::{DeliveryState, DeliveryStatus, OutboundService, SmtpTransport, Transport};
pub use publicbody::{PublicBody, PublicBodyId, PublicBodyRepository};
pub use request::{FoiRequest, NewRequest, RequestId, RequestRepository, RequestStatus};
pub use service::{MailPipeline, MailboxFetcher, ProcessReport};

//! Quarantine for mail that could not be routed.
//!
//! Rows stay as an audit trail. The only deletion is of unclassified mail
//! from a sender that is already flagged as spam.
//!
//! Rows feed two heuristics: a recipient that was redelivered to exactly
//! one request before resolves to it again, and a sender flagged as spam
//! once is dropped from then on.

mod model;
mod repository;

pub use model::{DeferredId, DeferredMessage, NewDeferred};
pub use repository::DeferredRepository;

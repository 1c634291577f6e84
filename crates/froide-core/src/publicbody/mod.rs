//! Public bodies and jurisdictions.
//!
//! The pipeline only needs to answer one question about authorities: which
//! public body does a sender address belong to. See
//! [`PublicBodyRepository::resolve_for_sender`].

mod model;
mod repository;

pub use model::{Jurisdiction, JurisdictionId, PublicBody, PublicBodyId};
pub use repository::PublicBodyRepository;

//! Public body data models.

use serde::{Deserialize, Serialize};

use crate::ids::id_type;

id_type!(
    /// Unique identifier for a public body.
    PublicBodyId
);

id_type!(
    /// Unique identifier for a jurisdiction.
    JurisdictionId
);

/// An authority FOI requests are addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicBody {
    /// Row id.
    pub id: PublicBodyId,
    /// Display name.
    pub name: String,
    /// Contact address, lowercased.
    pub email: String,
    /// Jurisdiction the body belongs to.
    pub jurisdiction_id: Option<JurisdictionId>,
}

impl PublicBody {
    /// Domain part of the contact address.
    #[must_use]
    pub fn email_domain(&self) -> Option<&str> {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }
}

/// A jurisdiction, optionally with an FOI mediator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jurisdiction {
    /// Row id.
    pub id: JurisdictionId,
    /// Display name.
    pub name: String,
    /// Public body acting as FOI mediator (ombudsperson).
    pub mediator_id: Option<PublicBodyId>,
}

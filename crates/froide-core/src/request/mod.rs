//! FOI requests and their secret reply addresses.
//!
//! Every request owns a unique secret address. Inbound mail is matched to a
//! request through [`resolve_request_from_email`], which understands both
//! the current opaque addresses and the legacy `<hero-name>_<id>` form.

mod codec;
mod model;
mod repository;

pub use codec::{
    decode_legacy_address, generate_secret_address, hero_name, is_valid_hero_name,
    legacy_address, old_hero_name, resolve_request_from_email,
};
pub use model::{FoiRequest, NewRequest, RequestId, RequestStatus, slugify};
pub use repository::RequestRepository;

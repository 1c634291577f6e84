//! Outbound mail and its delivery state machine.
//!
//! A message goes `unknown -> sending` when it is handed to the transport.
//! Terminal states (`sent` and its refinements, `bounced`, `expired`,
//! `failed`) arrive later as delivery reports, correlated through the
//! `X-Froide-Message-Id` header.

mod service;
mod status;
mod transport;

pub use service::OutboundService;
pub use status::{DeliveryState, DeliveryStatus, DeliveryStatusRepository};
pub use transport::{
    FROIDE_MESSAGE_ID_HEADER, OutgoingEmail, SmtpTransport, Transport, froide_message_id,
    parse_froide_message_id,
};

//! # froide-mime
//!
//! Lenient MIME parsing for inbound FOI mail.
//!
//! ## Features
//!
//! - **Message parsing**: recursive multipart trees with a nesting limit
//! - **Headers**: unfolding, RFC 2047 encoded words, address lists and groups
//! - **Encoding/Decoding**: Base64, Quoted-Printable and charset fallback to Latin-1
//! - **Classification**: bounce (DSN) detection, auto-replies, failed DKIM/SPF/DMARC
//!
//! ## Quick Start
//!
//! ```
//! use froide_mime::parse_email;
//!
//! let raw = b"From: Amt <poststelle@amt.example>\r\n\
//!             To: anna.x7k2m9q4zt@foi.example\r\n\
//!             Subject: Ihre Anfrage\r\n\
//!             \r\n\
//!             Anbei die Unterlagen.";
//!
//! let email = parse_email(raw);
//! assert_eq!(email.from.email, "poststelle@amt.example");
//! assert_eq!(email.to[0].email, "anna.x7k2m9q4zt@foi.example");
//! assert!(!email.bounce_info.is_bounce);
//! ```
//!
//! [`parse_email`] never fails. Anything it cannot make sense of ends up as
//! an empty field, so callers must tolerate empty subjects, bodies and dates.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod bounce;
mod content_type;
mod error;
mod header;
mod html;
mod message;
mod parsed;

pub mod encoding;

pub use address::{Address, parse_address, parse_address_list};
pub use bounce::{BounceInfo, BounceType};
pub use content_type::{ContentDisposition, ContentType};
pub use error::{Error, Result};
pub use header::{Headers, split_head_body};
pub use html::html_to_text;
pub use message::{Message, Part, TransferEncoding, parse_date};
pub use parsed::{AuthenticityCheck, ParsedAttachment, ParsedEmail, parse_email};

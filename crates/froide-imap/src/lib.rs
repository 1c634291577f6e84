//! # froide-imap
//!
//! A small async IMAP client covering what a mail-ingest worker needs:
//! LOGIN, SELECT, `UID SEARCH`, `UID FETCH BODY.PEEK[]`, `UID STORE` and
//! LOGOUT.
//!
//! The client uses the type-state pattern, so commands that are invalid in
//! the current connection state do not compile:
//!
//! ```ignore
//! use froide_imap::{Client, Security, connect};
//!
//! let stream = connect("imap.example.org", 993, Security::Tls).await?;
//! let client = Client::from_stream(stream).await?;
//! let client = client.login("foi@example.org", "password").await?;
//! let mut inbox = client.select("INBOX").await?;
//!
//! let unseen = inbox.uid_search("UNSEEN").await?;
//! for message in inbox.uid_fetch_raw(&unseen).await? {
//!     println!("{} has {} bytes", message.uid, message.raw.len());
//! }
//! inbox.logout().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod framed;
mod response;
mod stream;
mod tag;
mod types;

pub use client::{Authenticated, Client, NotAuthenticated, Selected};
pub use error::{Error, Result};
pub use stream::{ImapStream, Security, connect, create_tls_connector};
pub use types::{FetchedMessage, MailboxStatus, Status, Uid};

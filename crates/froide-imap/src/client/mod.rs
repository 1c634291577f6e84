//! Type-state IMAP client connection.
//!
//! The connection moves through these states:
//!
//! - `NotAuthenticated`: after the greeting
//! - `Authenticated`: after LOGIN
//! - `Selected`: after SELECT
//!
//! Each state only exposes the commands that are valid in it.

#![allow(clippy::missing_errors_doc)]

mod authenticated;
mod not_authenticated;
mod selected;
mod states;

use std::marker::PhantomData;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

pub use self::states::{Authenticated, NotAuthenticated, Selected};
use crate::Result;
use crate::framed::FramedStream;
use crate::response::check_tagged_ok;
use crate::tag::TagGenerator;

/// IMAP client connection with type-state.
pub struct Client<S, State> {
    stream: FramedStream<S>,
    tags: TagGenerator,
    state: State,
}

impl<S, State> std::fmt::Debug for Client<S, State>
where
    State: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tags", &self.tags)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the state marker or data.
    #[must_use]
    pub const fn state(&self) -> &State {
        &self.state
    }

    /// Sends `command` with a fresh tag and collects the responses.
    ///
    /// Fails unless the tagged completion is OK.
    async fn run(&mut self, command: &str) -> Result<Vec<Vec<u8>>> {
        let tag = self.tags.next_tag();
        let line = format!("{tag} {command}\r\n");
        self.stream.write_command(line.as_bytes()).await?;

        let responses = self.stream.read_until_tagged(&tag).await?;
        check_tagged_ok(&responses, &tag)?;
        Ok(responses)
    }

    /// Logs out and closes the session.
    ///
    /// The BYE the server sends before the tagged OK is expected.
    pub async fn logout(mut self) -> Result<()> {
        debug!("logging out");
        self.run("LOGOUT").await?;
        Ok(())
    }

    fn transition<Next>(self, state: Next) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tags: self.tags,
            state,
        }
    }
}

/// Quotes a string argument, escaping backslashes and double quotes.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("INBOX"), "\"INBOX\"");
        assert_eq!(quote("pa\"ss\\word"), "\"pa\\\"ss\\\\word\"");
    }
}

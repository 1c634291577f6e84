//! Implementation for the not-authenticated state.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::states::{Authenticated, NotAuthenticated};
use super::{Client, quote};
use crate::Result;
use crate::framed::FramedStream;
use crate::response::check_greeting;
use crate::tag::TagGenerator;

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a client from a connected stream and reads the greeting.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut framed = FramedStream::new(stream);
        let greeting = framed.read_response().await?;
        check_greeting(&greeting)?;

        Ok(Self {
            stream: framed,
            tags: TagGenerator::default(),
            state: NotAuthenticated,
        })
    }

    /// Authenticates with LOGIN.
    pub async fn login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        debug!(username, "logging in");
        let command = format!("LOGIN {} {}", quote(username), quote(password));
        self.run(&command).await?;
        Ok(self.transition(Authenticated))
    }
}

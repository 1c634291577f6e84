//! IMAP failures.

use thiserror::Error;

/// Errors raised while talking to the mailbox server.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection failed or dropped.
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or record failure.
    #[error("TLS failure: {0}")]
    Tls(#[from] rustls::Error),

    /// The configured host is not a valid TLS server name.
    #[error("invalid server name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// The server refused the command (tagged `NO`).
    #[error("command refused: {0}")]
    No(String),

    /// The server could not parse the command (tagged `BAD`).
    #[error("command rejected as malformed: {0}")]
    Bad(String),

    /// The server closed the session.
    #[error("server closed the session: {0}")]
    Bye(String),

    /// The server sent something the client cannot interpret.
    #[error("unparseable server data: {0}")]
    Protocol(String),
}

impl Error {
    /// Whether the next batch on a fresh connection may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Bye(_))
    }
}

/// Result alias for IMAP operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(Error::Bye("maintenance".into()).is_transient());
        assert!(Error::Io(std::io::ErrorKind::ConnectionReset.into()).is_transient());
        assert!(!Error::No("[AUTHENTICATIONFAILED] bad password".into()).is_transient());
        assert!(!Error::Protocol("junk".into()).is_transient());
    }
}

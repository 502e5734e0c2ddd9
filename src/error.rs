//! Error types for the phoenix crate.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while dialing or driving a tunnel.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// TCP connect to the server failed.
    #[error("dial failed: {0}")]
    Dial(#[source] io::Error),

    /// TLS negotiation failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// The peer's certificate was rejected by the pinning verifier.
    #[error("server identity verification failed: {0}")]
    Verify(String),

    /// The server answered the tunnel request with a non-200 status.
    #[error("server rejected connection with status: {0}")]
    ServerRejected(u16),

    /// The 10-second dial deadline elapsed before response headers arrived.
    #[error("connection to server timed out")]
    DialTimeout,

    /// Generic request or connection failure.
    #[error("network error: {0}")]
    Network(String),

    /// The session stream was closed more than once.
    #[error("stream already closed")]
    AlreadyClosed,

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a TLS handshake error.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake(message.into())
    }

    /// Create a verification error.
    pub fn verify(message: impl Into<String>) -> Self {
        Self::Verify(message.into())
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this failure counts toward the consecutive-failure breaker.
    ///
    /// A rejection carries a live response from the server, so it proves the
    /// path is up and does not count. Double-close is swallowed by the stream
    /// and never reaches the breaker.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            Self::Dial(_)
                | Self::Handshake(_)
                | Self::Verify(_)
                | Self::DialTimeout
                | Self::Network(_)
        )
    }
}

impl From<h2::Error> for Error {
    fn from(err: h2::Error) -> Self {
        Self::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_classification() {
        assert!(Error::Dial(io::Error::other("refused")).counts_toward_breaker());
        assert!(Error::handshake("alert").counts_toward_breaker());
        assert!(Error::verify("mismatch").counts_toward_breaker());
        assert!(Error::DialTimeout.counts_toward_breaker());
        assert!(Error::network("reset").counts_toward_breaker());

        assert!(!Error::ServerRejected(401).counts_toward_breaker());
        assert!(!Error::AlreadyClosed.counts_toward_breaker());
        assert!(!Error::config("bad addr").counts_toward_breaker());
    }
}

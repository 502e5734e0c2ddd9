//! # Phoenix
//!
//! Client-side transport engine for the Phoenix tunneling system.
//!
//! Phoenix carries arbitrary TCP traffic between a client and a remote
//! server by encapsulating each proxied session inside a single long-lived
//! HTTP/2 request/response pair. To middleboxes every tunnel looks like
//! ordinary HTTP/2 — optionally behind a TLS handshake shaped to be
//! indistinguishable from a mainstream browser's — while internally the
//! connection multiplexes many independent duplex streams.
//!
//! The engine provides:
//! - five security modes (cleartext h2c, system PKI, insecure TLS, and
//!   one-way / mutual Ed25519 key pinning), derived from configuration;
//! - a BoringSSL-based dialer that mimics Chrome, Firefox, or Safari
//!   ClientHellos (or a fresh one per connection under `random`);
//! - Ed25519 subject-key pinning that bypasses the CA trust chain;
//! - a consecutive-failure circuit breaker that tears down and rebuilds the
//!   whole HTTP/2 transport when the network turns hostile.

// Core modules
pub mod config;
pub mod error;
pub mod identity;
pub mod protocol;

// Fingerprinting
pub mod fingerprint;

// Transport layer
pub mod transport;

// Re-exports for convenient access
pub use config::{ClientConfig, SecurityMode};
pub use error::{Error, Result};
pub use fingerprint::FingerprintProfile;
pub use protocol::ProtocolType;

// Transport re-exports
pub use transport::client::Client;
pub use transport::dialer::{Dialer, MaybeTlsStream};
pub use transport::stream::TunnelStream;

//! Ed25519 identity handling: key loading, the self-signed certificate
//! wrapper, and subject-key pinning.
//!
//! The server's identity is defined by its raw Ed25519 key, not by a trust
//! anchor; the self-signed X.509 wrapper exists only to satisfy the TLS
//! record layer. Chain validation against a CA is deliberately skipped on
//! the pinning path.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use boring::pkey::{Id, PKey, Private};
use boring::x509::X509;
use tracing::warn;

use crate::error::{Error, Result};

/// A client identity offered during the TLS handshake in mutual mode.
pub struct ClientIdentity {
    /// The Ed25519 private key loaded from disk.
    pub key: PKey<Private>,
    /// A self-signed certificate wrapping the key's public half.
    pub cert: X509,
}

/// Load an Ed25519 private key from a PEM file and wrap it in a self-signed
/// certificate for presentation during the handshake.
pub fn load_identity(path: impl AsRef<Path>) -> Result<ClientIdentity> {
    let path = path.as_ref();
    let pem = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;

    let key = PKey::private_key_from_pem(pem.as_bytes())
        .map_err(|e| Error::config(format!("failed to parse private key: {e}")))?;
    if key.id() != Id::ED25519 {
        return Err(Error::config("private key is not Ed25519"));
    }

    let cert = self_signed_certificate(&pem)?;
    Ok(ClientIdentity { key, cert })
}

/// Build the self-signed X.509 wrapper for a PEM-encoded Ed25519 key.
fn self_signed_certificate(key_pem: &str) -> Result<X509> {
    let key_pair = rcgen::KeyPair::from_pem(key_pem)
        .map_err(|e| Error::config(format!("failed to parse private key: {e}")))?;
    let params = rcgen::CertificateParams::new(vec!["phoenix".to_string()])
        .map_err(|e| Error::config(format!("failed to build certificate params: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::config(format!("failed to self-sign certificate: {e}")))?;

    X509::from_der(cert.der())
        .map_err(|e| Error::config(format!("failed to re-parse generated certificate: {e}")))
}

/// Verify the peer's leaf certificate against a pinned Ed25519 public key.
///
/// `expected` is the configured base64 key; when empty the peer is accepted
/// with a loud warning (bootstrap scenario: the operator has a client key but
/// has not yet pinned the server).
pub fn verify_pinned_key(expected: &str, raw_certs: &[Vec<u8>]) -> Result<()> {
    if expected.is_empty() {
        warn!("server_public_key NOT SET; connection vulnerable to machine-in-the-middle");
        return Ok(());
    }

    let leaf = raw_certs
        .first()
        .ok_or_else(|| Error::verify("no server certificate presented"))?;
    let cert = X509::from_der(leaf)
        .map_err(|e| Error::verify(format!("failed to parse server certificate: {e}")))?;
    let key = cert
        .public_key()
        .map_err(|e| Error::verify(format!("failed to extract server public key: {e}")))?;
    if key.id() != Id::ED25519 {
        return Err(Error::verify("server key is not Ed25519"));
    }

    let raw = key
        .raw_public_key()
        .map_err(|e| Error::verify(format!("failed to read raw server key: {e}")))?;
    let actual = BASE64.encode(&raw);
    if actual != expected {
        return Err(Error::verify(format!(
            "server key mismatch. Expected {expected}, Got {actual}"
        )));
    }
    Ok(())
}

/// Base64-encode a raw 32-byte Ed25519 public key the way configuration
/// files carry it.
pub fn encode_public_key(raw: &[u8]) -> String {
    BASE64.encode(raw)
}

//! Client configuration and security-mode derivation.

use std::fmt;

use serde::Deserialize;

/// Client-side tunnel configuration.
///
/// Immutable after construction. Empty strings mean "unset"; the derived
/// [`SecurityMode`] is a pure function of these fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Address of the tunnel server (e.g. "example.com:8080").
    /// Used for the HTTP `:authority` and TLS SNI — must be the domain,
    /// not a resolved IP.
    pub remote_addr: String,

    /// Overrides the TCP dial target (e.g. a pre-resolved "ip:port").
    /// Host runtimes without working DNS resolve the hostname out-of-band
    /// and write the IP here, while `remote_addr` keeps the original domain
    /// for the authority and TLS SNI.
    #[serde(default)]
    pub dial_addr: String,

    /// Bearer token sent to the server for authentication.
    /// Must match the server's auth_token.
    #[serde(default)]
    pub auth_token: String,

    /// Path to the client's Ed25519 private key file (PEM).
    #[serde(default, rename = "private_key")]
    pub private_key_path: String,

    /// Server's Ed25519 public key (base64, standard alphabet with padding).
    #[serde(default)]
    pub server_public_key: String,

    /// TLS verification strategy.
    /// "system" = system CA store (for CDN-fronted setups)
    /// "insecure" = encrypted but unverified
    /// "" (empty) = Ed25519 pinning or h2c based on the key fields
    #[serde(default)]
    pub tls_mode: String,

    /// TLS ClientHello fingerprint spoofing.
    /// ""        → platform default TLS (no spoofing)
    /// "chrome"  → mimic Chrome (recommended)
    /// "firefox" → mimic Firefox
    /// "safari"  → mimic Safari
    /// "random"  → random browser fingerprint per connection
    #[serde(default)]
    pub fingerprint: String,
}

/// Derived security mode. A closed set: each variant carries its own
/// handshake logic in the dialer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// No TLS; HTTP/2 prior-knowledge preface straight after TCP connect.
    CleartextH2c,
    /// Standard TLS with PKI validation against the system trust store.
    SystemTls,
    /// TLS without any certificate verification.
    InsecureTls,
    /// Self-signed TLS, server pinned by (or client identified by) an
    /// Ed25519 key; one side only.
    PinnedOneWayTls,
    /// Self-signed TLS with both a client identity and a pinned server key.
    PinnedMutualTls,
}

impl SecurityMode {
    /// Whether this mode encrypts the connection.
    pub fn uses_tls(&self) -> bool {
        !matches!(self, Self::CleartextH2c)
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CleartextH2c => "CLEARTEXT h2c (no TLS)",
            Self::SystemTls => "SYSTEM TLS (system CA verification)",
            Self::InsecureTls => "INSECURE TLS (cert verify DISABLED)",
            Self::PinnedOneWayTls => "ONE-WAY TLS (Ed25519 key pinning)",
            Self::PinnedMutualTls => "mTLS (Ed25519 key pinning)",
        };
        f.write_str(name)
    }
}

impl ClientConfig {
    /// Derive the security mode. First match wins.
    pub fn security_mode(&self) -> SecurityMode {
        if self.tls_mode == "system" {
            SecurityMode::SystemTls
        } else if self.tls_mode == "insecure" {
            SecurityMode::InsecureTls
        } else if !self.private_key_path.is_empty() && !self.server_public_key.is_empty() {
            SecurityMode::PinnedMutualTls
        } else if !self.private_key_path.is_empty() || !self.server_public_key.is_empty() {
            SecurityMode::PinnedOneWayTls
        } else {
            SecurityMode::CleartextH2c
        }
    }

    /// URI scheme for tunnel requests, derived once and never changed.
    pub fn scheme(&self) -> &'static str {
        if self.security_mode().uses_tls() {
            "https"
        } else {
            "http"
        }
    }

    /// The address actually dialed over TCP: `dial_addr` when set, else
    /// `remote_addr`.
    pub fn dial_target(&self) -> &str {
        if self.dial_addr.is_empty() {
            &self.remote_addr
        } else {
            &self.dial_addr
        }
    }

    /// Host portion of `remote_addr`, used for TLS SNI. Never derived from
    /// `dial_addr`: a pre-resolved IP serves as the TCP target while the
    /// fronting domain travels in SNI and the authority.
    pub fn sni_host(&self) -> &str {
        match self.remote_addr.rsplit_once(':') {
            Some((host, _port)) if !host.is_empty() => host,
            _ => &self.remote_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        tls_mode: &str,
        private_key_path: &str,
        server_public_key: &str,
    ) -> ClientConfig {
        ClientConfig {
            remote_addr: "example.com:443".into(),
            tls_mode: tls_mode.into(),
            private_key_path: private_key_path.into(),
            server_public_key: server_public_key.into(),
            ..Default::default()
        }
    }

    #[test]
    fn mode_is_pure_function_of_options() {
        assert_eq!(config("", "", "").security_mode(), SecurityMode::CleartextH2c);
        assert_eq!(
            config("system", "", "").security_mode(),
            SecurityMode::SystemTls
        );
        assert_eq!(
            config("insecure", "", "").security_mode(),
            SecurityMode::InsecureTls
        );
        assert_eq!(
            config("", "key.pem", "cHVi").security_mode(),
            SecurityMode::PinnedMutualTls
        );
        assert_eq!(
            config("", "key.pem", "").security_mode(),
            SecurityMode::PinnedOneWayTls
        );
        assert_eq!(
            config("", "", "cHVi").security_mode(),
            SecurityMode::PinnedOneWayTls
        );
    }

    #[test]
    fn tls_mode_wins_over_keys() {
        // First match wins: explicit tls_mode beats configured keys.
        assert_eq!(
            config("system", "key.pem", "cHVi").security_mode(),
            SecurityMode::SystemTls
        );
        assert_eq!(
            config("insecure", "key.pem", "").security_mode(),
            SecurityMode::InsecureTls
        );
    }

    #[test]
    fn scheme_follows_mode() {
        assert_eq!(config("", "", "").scheme(), "http");
        assert_eq!(config("system", "", "").scheme(), "https");
        assert_eq!(config("insecure", "", "").scheme(), "https");
        assert_eq!(config("", "key.pem", "").scheme(), "https");
    }

    #[test]
    fn sni_and_dial_target_split() {
        let mut cfg = config("insecure", "", "");
        cfg.dial_addr = "1.2.3.4:443".into();

        assert_eq!(cfg.dial_target(), "1.2.3.4:443");
        assert_eq!(cfg.sni_host(), "example.com");

        cfg.dial_addr.clear();
        assert_eq!(cfg.dial_target(), "example.com:443");
    }

    #[test]
    fn sni_host_without_port() {
        let cfg = ClientConfig {
            remote_addr: "example.com".into(),
            ..Default::default()
        };
        assert_eq!(cfg.sni_host(), "example.com");
    }
}

//! Fingerprinting dialer: raw TCP plus a BoringSSL handshake shaped to a
//! browser profile, with optional caller-supplied peer verification.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use boring::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;
use tracing::debug;

use crate::config::SecurityMode;
use crate::error::{Error, Result};
use crate::fingerprint::FingerprintProfile;
use crate::identity::ClientIdentity;

// FFI bindings for BoringSSL extension control
use boring_sys::SSL_CTX;
use std::os::raw::c_int;

extern "C" {
    /// Enable GREASE (Generate Random Extensions And Sustain Extensibility)
    pub fn SSL_CTX_set_grease_enabled(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
    /// Enable extension order permutation (Chrome 110+ behavior)
    pub fn SSL_CTX_set_permute_extensions(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
}

/// Caller-supplied verification over the peer's raw DER certificate chain.
/// Rejection aborts the connection and closes the socket.
pub type VerifyPeer = Arc<dyn Fn(&[Vec<u8>]) -> Result<()> + Send + Sync>;

/// Dials the tunnel server and completes TLS + ALPN "h2" negotiation
/// according to the security mode.
pub struct Dialer {
    mode: SecurityMode,
    /// TCP connect target: `dial_addr` when configured, else `remote_addr`.
    target: String,
    /// TLS SNI, always derived from `remote_addr`, never from `dial_addr`.
    server_name: String,
    identity: Option<ClientIdentity>,
    verify_peer: Option<VerifyPeer>,
}

impl Dialer {
    pub fn new(
        mode: SecurityMode,
        target: String,
        server_name: String,
        identity: Option<ClientIdentity>,
        verify_peer: Option<VerifyPeer>,
    ) -> Self {
        Self {
            mode,
            target,
            server_name,
            identity,
            verify_peer,
        }
    }

    /// Establish a connection ready for the HTTP/2 preface.
    ///
    /// `fingerprint` is the concrete profile for this connection (`random`
    /// has already been sampled by the caller so the TLS shape and the
    /// HTTP/2 SETTINGS agree on one browser).
    pub async fn dial(
        &self,
        fingerprint: Option<FingerprintProfile>,
    ) -> Result<MaybeTlsStream> {
        let tcp = TcpStream::connect(&self.target)
            .await
            .map_err(Error::Dial)?;

        if !self.mode.uses_tls() {
            return Ok(MaybeTlsStream::Plain(tcp));
        }

        let connector = self.configure_ssl(fingerprint)?;
        let mut config = connector
            .configure()
            .map_err(|e| Error::handshake(format!("failed to configure SSL: {e}")))?;

        match self.mode {
            SecurityMode::SystemTls => {
                // Default PKI + hostname verification against server_name.
            }
            _ => {
                // Insecure and pinned modes: the built-in verifier is off;
                // for pinned modes the callback below is the sole authority.
                config.set_verify(SslVerifyMode::NONE);
                config.set_verify_hostname(false);
            }
        }

        let tls = tokio_boring::connect(config, &self.server_name, tcp)
            .await
            .map_err(|e| Error::handshake(e.to_string()))?;

        match tls.ssl().selected_alpn_protocol() {
            Some(b"h2") => {}
            other => {
                return Err(Error::handshake(format!(
                    "server did not negotiate h2 (got {other:?})"
                )));
            }
        }

        if let Some(verify) = &self.verify_peer {
            let raw_certs = peer_chain_der(&tls);
            // Dropping the stream on rejection closes the socket.
            verify(&raw_certs)?;
        }

        debug!(server_name = %self.server_name, "TLS established");
        Ok(MaybeTlsStream::Tls(tls))
    }

    fn configure_ssl(
        &self,
        fingerprint: Option<FingerprintProfile>,
    ) -> Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::handshake(format!("failed to create SSL connector: {e}")))?;

        builder
            .set_min_proto_version(Some(SslVersion::TLS1_2))
            .map_err(|e| Error::handshake(format!("failed to set min TLS version: {e}")))?;
        builder
            .set_max_proto_version(Some(SslVersion::TLS1_3))
            .map_err(|e| Error::handshake(format!("failed to set max TLS version: {e}")))?;

        if let Some(profile) = fingerprint {
            let fp = profile.tls_fingerprint();

            let cipher_str = fp.cipher_list.join(":");
            builder
                .set_cipher_list(&cipher_str)
                .map_err(|e| Error::handshake(format!("failed to set cipher list: {e}")))?;

            let curves_str = fp.curves.join(":");
            builder
                .set_curves_list(&curves_str)
                .map_err(|e| Error::handshake(format!("failed to set curves: {e}")))?;

            let sigalgs_str = fp.sigalgs.join(":");
            builder
                .set_sigalgs_list(&sigalgs_str)
                .map_err(|e| Error::handshake(format!("failed to set signature algorithms: {e}")))?;

            // Chrome and Safari GREASE; Firefox permutes extensions without
            // GREASE. Permutation is what keeps per-connection orderings
            // fresh under fingerprint="random".
            unsafe {
                let ctx = builder.as_ptr() as *mut SSL_CTX;
                SSL_CTX_set_grease_enabled(ctx, fp.grease as c_int);
                SSL_CTX_set_permute_extensions(ctx, 1);
            }
        }

        if let Some(identity) = &self.identity {
            builder
                .set_certificate(&identity.cert)
                .map_err(|e| Error::handshake(format!("failed to set client certificate: {e}")))?;
            builder
                .set_private_key(&identity.key)
                .map_err(|e| Error::handshake(format!("failed to set client key: {e}")))?;
        }

        // The tunnel speaks HTTP/2 only.
        builder
            .set_alpn_protos(b"\x02h2")
            .map_err(|e| Error::handshake(format!("failed to set ALPN: {e}")))?;

        Ok(builder.build())
    }
}

/// Collect the peer's certificate chain as raw DER, leaf first.
fn peer_chain_der(tls: &SslStream<TcpStream>) -> Vec<Vec<u8>> {
    let ssl = tls.ssl();
    if let Some(chain) = ssl.peer_cert_chain() {
        return chain.iter().filter_map(|cert| cert.to_der().ok()).collect();
    }
    ssl.peer_certificate()
        .and_then(|leaf| leaf.to_der().ok())
        .map(|der| vec![der])
        .unwrap_or_default()
}

/// Stream that is either plain TCP (h2c prior knowledge) or TLS.
pub enum MaybeTlsStream {
    /// Plain TCP stream for cleartext HTTP/2.
    Plain(TcpStream),
    /// TLS-wrapped stream.
    Tls(SslStream<TcpStream>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

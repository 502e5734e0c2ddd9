//! In-process tunnel server for tests.
//!
//! Accepts HTTP/2 connections (plaintext or TLS), validates the tunnel
//! headers, answers 200 before touching the body, and echoes the request
//! body back on the response body. Records what it observed (SNI,
//! authority, tunnel headers) for assertions.

#![allow(dead_code)]

use std::future::poll_fn;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use boring::pkey::{PKey, Private};
use boring::ssl::{AlpnError, NameType, SslAcceptor, SslMethod};
use boring::x509::X509;
use bytes::Bytes;
use h2::server::SendResponse;
use h2::{RecvStream, SendStream};
use http::{Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// Observations from the most recent tunnel request / TLS handshake.
#[derive(Default)]
pub struct Observed {
    pub sni: Mutex<Option<String>>,
    pub authority: Mutex<Option<String>>,
    pub protocol: Mutex<Option<String>>,
    pub target: Mutex<Option<String>>,
}

pub struct EchoServer {
    pub addr: SocketAddr,
    pub observed: Arc<Observed>,
    /// Base64 Ed25519 subject key when running with a pinnable identity.
    pub public_key: Option<String>,
}

/// Generate an Ed25519 server identity. Returns the boring key + cert and
/// the base64 subject key a client would pin.
pub fn ed25519_identity() -> (PKey<Private>, X509, String) {
    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).expect("generate key");
    let params =
        rcgen::CertificateParams::new(vec!["127.0.0.1".to_string(), "localhost".to_string()])
            .expect("cert params");
    let cert = params.self_signed(&key).expect("self-sign");

    let pkey =
        PKey::private_key_from_pem(key.serialize_pem().as_bytes()).expect("parse private key");
    let x509 = X509::from_der(cert.der()).expect("parse certificate");
    let public_b64 =
        phoenix::identity::encode_public_key(&pkey.raw_public_key().expect("raw public key"));
    (pkey, x509, public_b64)
}

/// Generate an ECDSA P-256 identity, for tests where the certificate only
/// has to satisfy the record layer (insecure mode, fingerprint runs).
pub fn ecdsa_identity() -> (PKey<Private>, X509) {
    let bundle = rcgen::generate_simple_self_signed(vec![
        "127.0.0.1".to_string(),
        "localhost".to_string(),
        "phoenix.test".to_string(),
    ])
    .expect("generate cert");
    let pkey = PKey::private_key_from_pem(bundle.signing_key.serialize_pem().as_bytes())
        .expect("parse private key");
    let x509 = X509::from_pem(bundle.cert.pem().as_bytes()).expect("parse certificate");
    (pkey, x509)
}

/// Spawn a plaintext (h2c) echo server.
pub async fn spawn_plain(expected_token: Option<String>) -> EchoServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let observed = Arc::new(Observed::default());

    let obs = Arc::clone(&observed);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let obs = Arc::clone(&obs);
            let token = expected_token.clone();
            tokio::spawn(async move {
                let _ = serve_conn(stream, obs, token).await;
            });
        }
    });

    EchoServer {
        addr,
        observed,
        public_key: None,
    }
}

/// Spawn a TLS echo server with an Ed25519 identity (pinning tests).
pub async fn spawn_tls(expected_token: Option<String>) -> EchoServer {
    let (pkey, x509, public_b64) = ed25519_identity();
    spawn_tls_with(pkey, x509, Some(public_b64), expected_token).await
}

/// Spawn a TLS echo server with an ECDSA identity (insecure-mode tests).
pub async fn spawn_tls_ecdsa(expected_token: Option<String>) -> EchoServer {
    let (pkey, x509) = ecdsa_identity();
    spawn_tls_with(pkey, x509, None, expected_token).await
}

async fn spawn_tls_with(
    pkey: PKey<Private>,
    x509: X509,
    public_key: Option<String>,
    expected_token: Option<String>,
) -> EchoServer {
    let mut builder =
        SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).expect("acceptor builder");
    builder.set_private_key(&pkey).expect("set private key");
    builder.set_certificate(&x509).expect("set certificate");
    builder.set_alpn_select_callback(|_, client_protos| {
        boring::ssl::select_next_proto(b"\x02h2", client_protos).ok_or(AlpnError::NOACK)
    });
    let acceptor = builder.build();

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let observed = Arc::new(Observed::default());

    let obs = Arc::clone(&observed);
    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                break;
            };
            let acceptor = acceptor.clone();
            let obs = Arc::clone(&obs);
            let token = expected_token.clone();
            tokio::spawn(async move {
                let Ok(tls) = tokio_boring::accept(&acceptor, tcp).await else {
                    return;
                };
                *obs.sni.lock().unwrap() = tls
                    .ssl()
                    .servername(NameType::HOST_NAME)
                    .map(str::to_owned);
                let _ = serve_conn(tls, obs, token).await;
            });
        }
    });

    EchoServer {
        addr,
        observed,
        public_key,
    }
}

async fn serve_conn<S>(
    io: S,
    observed: Arc<Observed>,
    expected_token: Option<String>,
) -> Result<(), h2::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = h2::server::handshake(io).await?;
    while let Some(result) = conn.accept().await {
        let (request, respond) = result?;
        let observed = Arc::clone(&observed);
        let token = expected_token.clone();
        tokio::spawn(async move {
            let _ = handle_request(request, respond, observed, token).await;
        });
    }
    Ok(())
}

async fn handle_request(
    request: Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
    observed: Arc<Observed>,
    expected_token: Option<String>,
) -> Result<(), h2::Error> {
    *observed.authority.lock().unwrap() =
        request.uri().authority().map(|a| a.to_string());
    *observed.protocol.lock().unwrap() = header_str(&request, "x-nerve-protocol");
    *observed.target.lock().unwrap() = header_str(&request, "x-nerve-target");

    if let Some(expected) = &expected_token {
        if header_str(&request, "x-nerve-token").as_deref() != Some(expected) {
            let response = Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(())
                .unwrap();
            respond.send_response(response, true)?;
            return Ok(());
        }
    }

    if header_str(&request, "x-nerve-protocol").is_none() {
        let response = Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(())
            .unwrap();
        respond.send_response(response, true)?;
        return Ok(());
    }

    // Headers go out before any body bytes: the client's dispatch is
    // blocked on them.
    let response = Response::builder().status(StatusCode::OK).body(()).unwrap();
    let mut tx = respond.send_response(response, false)?;

    let mut body = request.into_body();
    while let Some(chunk) = poll_fn(|cx| body.poll_data(cx)).await {
        let chunk = chunk?;
        let _ = body.flow_control().release_capacity(chunk.len());
        if !send_all(&mut tx, chunk).await? {
            return Ok(());
        }
    }
    tx.send_data(Bytes::new(), true)?;
    Ok(())
}

/// Write `data` respecting flow control. Returns false if the peer reset
/// the stream.
async fn send_all(tx: &mut SendStream<Bytes>, mut data: Bytes) -> Result<bool, h2::Error> {
    while !data.is_empty() {
        tx.reserve_capacity(data.len());
        match poll_fn(|cx| tx.poll_capacity(cx)).await {
            Some(Ok(0)) => continue,
            Some(Ok(available)) => {
                let n = available.min(data.len());
                tx.send_data(data.split_to(n), false)?;
            }
            Some(Err(e)) => return Err(e),
            None => return Ok(false),
        }
    }
    Ok(true)
}

fn header_str(request: &Request<RecvStream>, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

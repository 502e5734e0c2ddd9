//! The client engine: dial orchestration and the self-healing breaker.
//!
//! One engine owns one [`Instance`] at a time. Dials snapshot it under a
//! shared read lock; a hard reset swaps it under the exclusive lock. Three
//! consecutive connection-level failures strongly indicate a dead TCP path
//! or a blocked SNI, so the breaker destroys the whole instance and builds
//! a fresh one: new DNS lookup, new TCP handshake, and a re-randomized
//! ClientHello under fingerprint="random".

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::{Method, Request, StatusCode, Uri};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{ClientConfig, SecurityMode};
use crate::error::{Error, Result};
use crate::protocol::{ProtocolType, PROTOCOL_HEADER, TARGET_HEADER, TOKEN_HEADER};
use crate::transport::instance::Instance;
use crate::transport::stream::TunnelStream;

/// Handshake deadline for a dial: connection establishment, request
/// dispatch, and response headers. An open stream has no timeout.
const DIAL_DEADLINE: Duration = Duration::from_secs(10);
/// Consecutive failures that trigger a hard reset.
const MAX_FAILURES: u32 = 3;
/// A reset trigger within this window of the previous reset is debounced.
const RESET_DEBOUNCE: Duration = Duration::from_secs(5);
/// Pause after a rebuild before the next dial proceeds.
const RESET_BACKOFF: Duration = Duration::from_secs(1);

/// Handle to the tunnel client engine. Cheap to clone; all clones share the
/// same instance, failure counter, and breaker state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    mode: SecurityMode,
    scheme: &'static str,
    core: RwLock<Core>,
    failures: AtomicU32,
    generations: AtomicU64,
}

struct Core {
    instance: Arc<Instance>,
    /// Timestamp of the last hard reset, for debounce. Only touched while
    /// holding the write lock.
    last_reset: Option<Instant>,
}

impl Client {
    /// Create a new tunnel client. The scheme and security mode are derived
    /// once here and never change.
    pub fn new(config: ClientConfig) -> Self {
        let mode = config.security_mode();
        let scheme = config.scheme();
        log_security_status(&config, mode);

        let instance = Arc::new(Instance::new(&config, 0));
        Self {
            inner: Arc::new(ClientInner {
                config,
                mode,
                scheme,
                core: RwLock::new(Core {
                    instance,
                    last_reset: None,
                }),
                failures: AtomicU32::new(0),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The derived security mode.
    pub fn security_mode(&self) -> SecurityMode {
        self.inner.mode
    }

    /// Current consecutive-failure count.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.failures.load(Ordering::SeqCst)
    }

    /// Generation of the current instance. Bumped by every hard reset;
    /// useful for diagnosing breaker behavior.
    pub async fn instance_generation(&self) -> u64 {
        self.inner.core.read().await.instance.generation()
    }

    /// Open a tunnel session for `protocol`, optionally naming a forward
    /// `target`, and return the duplex stream carrying it.
    ///
    /// The returned stream has no further deadline; the caller owns it and
    /// is responsible for shutting it down.
    pub async fn dial(&self, protocol: ProtocolType, target: &str) -> Result<TunnelStream> {
        // Snapshot the current instance; a concurrent reset swaps the
        // pointer but never disturbs a dial already holding its own Arc.
        let instance = self.inner.core.read().await.instance.clone();

        match tokio::time::timeout(DIAL_DEADLINE, self.dispatch(&instance, protocol, target))
            .await
        {
            Ok(Ok((response, send_stream))) => {
                if response.status() != StatusCode::OK {
                    // Dropping the response body resets the stream; the
                    // server is alive, so the breaker is not consulted.
                    return Err(Error::ServerRejected(response.status().as_u16()));
                }
                self.inner.failures.store(0, Ordering::SeqCst);
                Ok(TunnelStream::new(send_stream, response.into_body()))
            }
            Ok(Err(err)) => {
                self.note_failure(&err);
                Err(err)
            }
            Err(_elapsed) => {
                // Dropping the in-flight dispatch future resets the orphaned
                // HTTP/2 stream, so a late response cannot leak it.
                let err = Error::DialTimeout;
                self.note_failure(&err);
                Err(err)
            }
        }
    }

    /// Establish (or reuse) the connection, send the tunnel request, and
    /// wait for response headers. The connection driver task keeps frames
    /// moving while we block here, so a caller writing before the server
    /// acknowledges the session cannot deadlock the dispatch.
    async fn dispatch(
        &self,
        instance: &Instance,
        protocol: ProtocolType,
        target: &str,
    ) -> Result<(http::Response<h2::RecvStream>, h2::SendStream<bytes::Bytes>)> {
        let handle = instance.handle().await?;
        let mut handle = handle.ready().await?;

        let request = self.build_request(protocol, target)?;
        // The request body stays open: the SendStream is the write half of
        // the session.
        let (response, send_stream) = handle.send_request(request, false)?;
        let response = response.await?;
        Ok((response, send_stream))
    }

    fn build_request(&self, protocol: ProtocolType, target: &str) -> Result<Request<()>> {
        let uri: Uri = format!("{}://{}/", self.inner.scheme, self.inner.config.remote_addr)
            .parse()
            .map_err(|e| Error::config(format!("invalid remote_addr: {e}")))?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(PROTOCOL_HEADER, protocol.as_str());
        if !target.is_empty() {
            builder = builder.header(TARGET_HEADER, target);
        }
        if !self.inner.config.auth_token.is_empty() {
            builder = builder.header(TOKEN_HEADER, self.inner.config.auth_token.as_str());
        }

        builder
            .body(())
            .map_err(|e| Error::config(format!("invalid tunnel request: {e}")))
    }

    /// Count a breaker-eligible failure and, at the threshold, kick off a
    /// hard reset in the background. The failing caller returns immediately.
    fn note_failure(&self, err: &Error) {
        if !err.counts_toward_breaker() {
            return;
        }
        let count = self.inner.failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!("connection error ({count}/{MAX_FAILURES}): {err}");

        if count >= MAX_FAILURES {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.reset().await });
        }
    }
}

impl ClientInner {
    /// Destroy the current instance and build a fresh one.
    async fn reset(self: Arc<Self>) {
        let mut core = self.core.write().await;

        // Debounce: a reset moments ago already addressed this burst.
        if let Some(last) = core.last_reset {
            if last.elapsed() < RESET_DEBOUNCE {
                self.failures.store(0, Ordering::SeqCst);
                return;
            }
        }

        warn!("network unstable; destroying and recreating the HTTP/2 client (hard reset)");
        core.instance.close_idle().await;

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        core.instance = Arc::new(Instance::new(&self.config, generation));
        core.last_reset = Some(Instant::now());
        self.failures.store(0, Ordering::SeqCst);

        // Backoff against immediate re-failure, still holding the write
        // lock: the next dial's snapshot waits this out.
        tokio::time::sleep(RESET_BACKOFF).await;
        info!("client re-initialized; ready for new connections");
    }
}

/// Human-readable security status at startup.
fn log_security_status(config: &ClientConfig, mode: SecurityMode) {
    let token = if config.auth_token.is_empty() {
        "disabled"
    } else {
        "ENABLED"
    };

    match mode {
        SecurityMode::CleartextH2c => {
            info!("security mode: {mode} | token auth: {token}");
        }
        _ => {
            let fingerprint = if config.fingerprint.is_empty() {
                "disabled"
            } else {
                config.fingerprint.as_str()
            };
            info!("security mode: {mode} | token auth: {token} | fingerprint: {fingerprint}");
        }
    }
}

//! The HTTP client instance: one multiplexed HTTP/2 connection built from
//! the fingerprinting dialer, plus its driver and keep-alive tasks.
//!
//! Per-mode variation lives entirely in how the dialer is configured; the
//! h2 layer is identical across modes. The h2 client enforces the server's
//! advertised max-concurrent-streams on this single connection, and no
//! read-idle timeout is applied anywhere: a tunnel stream may sit quiet for
//! hours. Liveness comes from the PING probe instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use h2::client::SendRequest;
use h2::{Ping, PingPong};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, SecurityMode};
use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintProfile, Http2Settings};
use crate::identity;
use crate::transport::dialer::{Dialer, VerifyPeer};

/// Keep-alive probe interval on an established connection.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
/// Deadline for the server's pong. A missed pong marks the connection dead.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// An HTTP/2 transport bound to one security mode. Destroyed as a whole on
/// hard reset; never reused afterwards.
pub(crate) struct Instance {
    dialer: Dialer,
    fingerprint: Option<FingerprintProfile>,
    generation: u64,
    conn: Mutex<Option<Conn>>,
}

struct Conn {
    send_request: SendRequest<Bytes>,
    broken: Arc<AtomicBool>,
    keepalive: Option<JoinHandle<()>>,
}

impl Drop for Conn {
    fn drop(&mut self) {
        // The driver task is detached: it winds the connection down on its
        // own once the last in-flight stream finishes. Only the probe loop
        // needs stopping here.
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
    }
}

impl Instance {
    /// Build an instance from the configuration. Identity problems are
    /// logged and degrade the handshake rather than failing construction,
    /// so a broken key file still leaves the client able to retry.
    pub fn new(config: &ClientConfig, generation: u64) -> Self {
        let mode = config.security_mode();
        let fingerprint = FingerprintProfile::from_config(&config.fingerprint);

        let pinned = matches!(
            mode,
            SecurityMode::PinnedOneWayTls | SecurityMode::PinnedMutualTls
        );

        let client_identity = if pinned && !config.private_key_path.is_empty() {
            match identity::load_identity(&config.private_key_path) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!("failed to load client identity: {e}");
                    None
                }
            }
        } else {
            None
        };

        let verify_peer: Option<VerifyPeer> = if pinned {
            let expected = config.server_public_key.clone();
            Some(Arc::new(move |raw_certs: &[Vec<u8>]| {
                identity::verify_pinned_key(&expected, raw_certs)
            }))
        } else {
            None
        };

        info!("creating {mode} transport (generation {generation})");

        let dialer = Dialer::new(
            mode,
            config.dial_target().to_string(),
            config.sni_host().to_string(),
            client_identity,
            verify_peer,
        );

        Self {
            dialer,
            fingerprint,
            generation,
            conn: Mutex::new(None),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A request handle on the shared connection, establishing it first if
    /// none is live. Concurrent callers serialize on establishment and then
    /// multiplex over the same connection.
    pub async fn handle(&self) -> Result<SendRequest<Bytes>> {
        let mut guard = self.conn.lock().await;

        if let Some(conn) = guard.as_ref() {
            if !conn.broken.load(Ordering::Acquire) {
                return Ok(conn.send_request.clone());
            }
            debug!("connection marked broken; reconnecting");
        }

        *guard = None;
        let conn = self.connect().await?;
        let handle = conn.send_request.clone();
        *guard = Some(conn);
        Ok(handle)
    }

    /// Drop the current connection. In-flight streams keep their handles and
    /// finish on the old connection, which closes itself once drained.
    pub async fn close_idle(&self) {
        *self.conn.lock().await = None;
    }

    async fn connect(&self) -> Result<Conn> {
        // One browser per connection: the sampled profile shapes both the
        // ClientHello and the HTTP/2 SETTINGS.
        let profile = self.fingerprint.map(FingerprintProfile::sample);
        let settings = profile
            .map(|p| p.http2_settings())
            .unwrap_or_default();

        let stream = self.dialer.dial(profile).await?;

        let mut builder = h2::client::Builder::new();
        builder
            .header_table_size(settings.header_table_size)
            .enable_push(settings.enable_push)
            .max_concurrent_streams(settings.max_concurrent_streams)
            .initial_window_size(settings.initial_window_size)
            .initial_connection_window_size(settings.connection_window_size)
            .max_frame_size(settings.max_frame_size)
            .max_header_list_size(settings.max_header_list_size);

        let (send_request, mut connection) = builder
            .handshake(stream)
            .await
            .map_err(|e| Error::network(format!("HTTP/2 handshake failed: {e}")))?;

        let broken = Arc::new(AtomicBool::new(false));
        let ping_pong = connection.ping_pong();

        let generation = self.generation;
        let flag = Arc::clone(&broken);
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("HTTP/2 connection (generation {generation}) terminated: {e}");
            }
            flag.store(true, Ordering::Release);
        });

        let keepalive = ping_pong.map(|pp| {
            let flag = Arc::clone(&broken);
            tokio::spawn(keepalive_loop(pp, flag))
        });

        debug!("HTTP/2 connection established (generation {generation})");

        Ok(Conn {
            send_request,
            broken,
            keepalive,
        })
    }
}

/// Periodic PING health probe. The connection carries long-idle streams, so
/// this is the only liveness signal.
async fn keepalive_loop(mut ping_pong: PingPong, broken: Arc<AtomicBool>) {
    loop {
        tokio::time::sleep(KEEPALIVE_INTERVAL).await;
        match tokio::time::timeout(PING_TIMEOUT, ping_pong.ping(Ping::opaque())).await {
            Ok(Ok(_pong)) => {}
            Ok(Err(e)) => {
                debug!("keep-alive ping failed: {e}");
                broken.store(true, Ordering::Release);
                return;
            }
            Err(_) => {
                warn!("keep-alive pong missed the {PING_TIMEOUT:?} deadline; marking connection dead");
                broken.store(true, Ordering::Release);
                return;
            }
        }
    }
}

//! A TCP gate that either kills incoming connections on accept or forwards
//! them to an upstream address. Drives the circuit-breaker tests: closing
//! the gate produces fast connection-level failures, opening it lets dials
//! through to a real echo server.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

pub struct FlakyGate {
    pub addr: SocketAddr,
    failing: Arc<AtomicBool>,
}

impl FlakyGate {
    /// Spawn the gate in failing mode.
    pub async fn spawn(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let failing = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&failing);
        tokio::spawn(async move {
            loop {
                let Ok((mut downstream, _)) = listener.accept().await else {
                    break;
                };
                if flag.load(Ordering::SeqCst) {
                    // Immediate close: the HTTP/2 preface dies on arrival.
                    continue;
                }
                tokio::spawn(async move {
                    if let Ok(mut upstream_conn) = TcpStream::connect(upstream).await {
                        let _ =
                            tokio::io::copy_bidirectional(&mut downstream, &mut upstream_conn)
                                .await;
                    }
                });
            }
        });

        Self { addr, failing }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

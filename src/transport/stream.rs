//! The session stream: a duplex byte channel over one HTTP/2 request.
//!
//! The write half is the request body's `SendStream`, the read half the
//! response body's `RecvStream`. All framing, ordering, and flow control are
//! the HTTP/2 layer's; this type only adapts the two halves to the tokio
//! I/O traits. Either half may close independently, and a stream left open
//! by the caller is reset when dropped.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use h2::{RecvStream, SendStream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

/// A duplex byte channel produced by `Client::dial`, backed by one HTTP/2
/// request/response pair.
///
/// The caller owns the underlying HTTP/2 stream: shut the write half down
/// (or drop the whole stream) when done. Shutdown is idempotent.
pub struct TunnelStream {
    send: SendStream<Bytes>,
    recv: RecvStream,
    /// Bytes received but not yet copied out.
    readbuf: Bytes,
    write_closed: bool,
}

impl TunnelStream {
    pub(crate) fn new(send: SendStream<Bytes>, recv: RecvStream) -> Self {
        Self {
            send,
            recv,
            readbuf: Bytes::new(),
            write_closed: false,
        }
    }

    /// Signal end-of-stream to the server exactly once. Later calls (and
    /// failures against an already-reset stream) are swallowed.
    fn close_write(&mut self) {
        if self.write_closed {
            return;
        }
        self.write_closed = true;
        if let Err(e) = self.send.send_data(Bytes::new(), true) {
            debug!("end-of-stream signal failed: {e}");
        }
    }
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.readbuf.is_empty() {
                let n = this.readbuf.len().min(buf.remaining());
                let chunk = this.readbuf.split_to(n);
                buf.put_slice(&chunk);
                // Return the consumed window so the server can keep sending.
                let _ = this.recv.flow_control().release_capacity(n);
                return Poll::Ready(Ok(()));
            }

            match this.recv.poll_data(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.readbuf = chunk;
                    // Empty DATA frames loop straight back into poll_data.
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(io::Error::other(e)));
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.write_closed {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        this.send.reserve_capacity(buf.len());
        loop {
            match this.send.poll_capacity(cx) {
                Poll::Ready(Some(Ok(0))) => continue,
                Poll::Ready(Some(Ok(available))) => {
                    let n = available.min(buf.len());
                    this.send
                        .send_data(Bytes::copy_from_slice(&buf[..n]), false)
                        .map_err(io::Error::other)?;
                    return Poll::Ready(Ok(n));
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(io::Error::other(e))),
                Poll::Ready(None) => {
                    return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Data frames are handed to the connection driver as they are
        // written; there is no client-side buffer to flush.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().close_write();
        Poll::Ready(Ok(()))
    }
}

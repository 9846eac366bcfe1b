//! Accepted-stream wrapper that records transport failure
//!
//! rmcp owns the stream once a session is served, so the health monitor
//! cannot ask the socket directly. The wrapper flags EOF and I/O errors as
//! they pass through and the monitor polls the flag.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

#[derive(Debug, Clone, Default)]
pub struct TransportHealth {
    failed: Arc<AtomicBool>,
}

impl TransportHealth {
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }
}

pub struct MonitoredStream<T> {
    inner: T,
    health: TransportHealth,
}

impl<T> MonitoredStream<T> {
    pub fn new(inner: T) -> (Self, TransportHealth) {
        let health = TransportHealth::default();
        (
            Self {
                inner,
                health: health.clone(),
            },
            health,
        )
    }

    fn record<R>(&self, result: &Poll<io::Result<R>>) {
        if let Poll::Ready(Err(_)) = result {
            self.health.mark_failed();
        }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for MonitoredStream<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        self.record(&result);
        if let Poll::Ready(Ok(())) = result {
            if buf.filled().len() == before && buf.remaining() > 0 {
                // EOF
                self.health.mark_failed();
            }
        }
        result
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for MonitoredStream<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.inner).poll_write(cx, buf);
        self.record(&result);
        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = Pin::new(&mut self.inner).poll_flush(cx);
        self.record(&result);
        result
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = Pin::new(&mut self.inner).poll_shutdown(cx);
        self.health.mark_failed();
        result
    }
}

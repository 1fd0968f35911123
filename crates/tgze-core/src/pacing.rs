//! Rate-limited reader for throttled downloads.

use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, ReadBuf},
    time::Sleep,
};

/// Wraps a reader so that after each read of `n` bytes the next read waits
/// `n * 8 / bits_per_second` seconds.
pub struct PacedReader<R> {
    inner: R,
    bits_per_second: f64,
    delay: Option<Pin<Box<Sleep>>>,
}

impl<R> PacedReader<R> {
    pub fn new(inner: R, kbps: u64) -> Self {
        Self {
            inner,
            bits_per_second: (kbps.max(1) * 1024) as f64,
            delay: None,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for PacedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(delay) = self.delay.as_mut() {
            if delay.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            self.delay = None;
        }

        let before = buf.filled().len();
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;
                if n > 0 {
                    let wait = Duration::from_secs_f64(n as f64 * 8.0 / this.bits_per_second);
                    this.delay = Some(Box::pin(tokio::time::sleep(wait)));
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

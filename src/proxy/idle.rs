//! An `AsyncRead`/`AsyncWrite` wrapper that tracks time since the last
//! byte crossed the wire, paired with a helper that races a hyper
//! connection future against that deadline.
//!
//! `hyper::server::conn::Http::serve_connection` has no built-in
//! per-connection idle timeout, so the idle timeout between requests
//! (§4.2, 60s default) is layered on top of it here rather than inside
//! hyper itself.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

pub struct IdleTracker {
    last_activity: Mutex<Instant>,
}

impl IdleTracker {
    pub fn new() -> Self {
        Self {
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().expect("idle tracker poisoned") = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().expect("idle tracker poisoned").elapsed()
    }
}

/// Wraps a stream, resetting the shared `IdleTracker` on every byte read
/// or written.
pub struct IdleWatchStream<S> {
    inner: S,
    tracker: Arc<IdleTracker>,
}

impl<S> IdleWatchStream<S> {
    pub fn new(inner: S, tracker: Arc<IdleTracker>) -> Self {
        Self { inner, tracker }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for IdleWatchStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let res = Pin::new(&mut this.inner).poll_read(cx, buf);
        if matches!(res, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.tracker.touch();
        }
        res
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdleWatchStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &res {
            if *n > 0 {
                this.tracker.touch();
            }
        }
        res
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Race `conn` against the idle deadline, checking `tracker` once a
/// second. Returns whatever `conn` resolves to, or an `Err` built from a
/// `TimedOut` io error if the connection sat idle past `idle_timeout` --
/// in which case `conn` (and the socket it owns) is dropped.
pub async fn drive_with_idle_timeout<F, T, E>(
    tracker: Arc<IdleTracker>,
    idle_timeout: Duration,
    conn: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: From<std::io::Error>,
{
    tokio::pin!(conn);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            biased;
            res = &mut conn => return res,
            _ = ticker.tick() => {
                if tracker.idle_for() >= idle_timeout {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connection idle timeout",
                    )
                    .into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idle_timeout_fires_when_never_touched() {
        let tracker = Arc::new(IdleTracker::new());
        let never_resolves = std::future::pending::<Result<(), std::io::Error>>();
        let result = tokio::time::timeout(
            Duration::from_millis(2500),
            drive_with_idle_timeout(tracker, Duration::from_millis(1200), never_resolves),
        )
        .await
        .expect("idle timeout should fire within the outer test timeout");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn returns_inner_result_when_it_resolves_first() {
        let tracker = Arc::new(IdleTracker::new());
        let quick = async { Ok::<_, std::io::Error>(42) };
        let result = drive_with_idle_timeout(tracker, Duration::from_secs(60), quick).await;
        assert_eq!(result.unwrap(), 42);
    }
}

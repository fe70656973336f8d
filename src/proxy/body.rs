//! Streaming response body from a target.
//!
//! Holds the pooled connection while the client reads. The connection goes
//! back to the free list only at a clean end of stream; an upstream error,
//! a read timeout, the request deadline or a client disconnect discards it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use hyper::body::Incoming;
use thiserror::Error;
use tokio::time::{self, Instant, Sleep};

use crate::upstream::PooledConnection;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("upstream body error: {0}")]
    Upstream(#[from] hyper::Error),

    #[error("request deadline exceeded while streaming")]
    DeadlineExceeded,

    #[error("no data from upstream for {0:?}")]
    ReadTimeout(Duration),
}

impl BodyError {
    /// A slow client can run out the deadline; that is not the target's fault.
    pub fn counts_against_target(&self) -> bool {
        !matches!(self, BodyError::DeadlineExceeded)
    }
}

pub struct UpstreamBody {
    inner: Incoming,
    conn: Option<PooledConnection>,
    deadline: Pin<Box<Sleep>>,
    idle: Pin<Box<Sleep>>,
    read_timeout: Duration,
    request_id: String,
}

impl UpstreamBody {
    pub fn new(
        inner: Incoming,
        conn: PooledConnection,
        deadline: Instant,
        read_timeout: Duration,
        request_id: String,
    ) -> Self {
        let mut body = Self {
            inner,
            conn: Some(conn),
            deadline: Box::pin(time::sleep_until(deadline)),
            idle: Box::pin(time::sleep(read_timeout)),
            read_timeout,
            request_id,
        };
        // nothing will poll an empty body
        if body.inner.is_end_stream() {
            body.finish();
        }
        body
    }

    fn finish(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(request_id = %self.request_id, target_addr = %conn.addr(), "Request completed");
            conn.release();
        }
    }

    fn abort(&mut self, err: &BodyError) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(
                request_id = %self.request_id,
                target_addr = %conn.addr(),
                error = %err,
                "Response stream aborted"
            );
            if err.counts_against_target() {
                conn.report_failure(err);
            }
        }
    }
}

impl Body for UpstreamBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        // checked before every read: a fast target never returns Pending
        if this.conn.is_some() && this.deadline.as_mut().poll(cx).is_ready() {
            let err = BodyError::DeadlineExceeded;
            this.abort(&err);
            return Poll::Ready(Some(Err(err)));
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                this.idle.as_mut().reset(Instant::now() + this.read_timeout);
                if this.inner.is_end_stream() {
                    this.finish();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                let err = BodyError::from(e);
                this.abort(&err);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => {
                if this.idle.as_mut().poll(cx).is_pending() {
                    return Poll::Pending;
                }
                let err = BodyError::ReadTimeout(this.read_timeout);
                this.abort(&err);
                Poll::Ready(Some(Err(err)))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for UpstreamBody {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::debug!(request_id = %self.request_id, "Client went away, discarding upstream connection");
        }
    }
}

//! Outbound request body that reports when it has been handed to the
//! connection.
//!
//! The write timeout covers the span from `send_request` until the whole
//! body has been taken by the HTTP/1 encoder. hyper resolves the send future
//! only once response headers arrive, so the body itself signals the end of
//! the write phase.
//!
//! The encoder stops polling once the declared length is reached and drops
//! the body without asking for the terminating `None`. The signal therefore
//! fires with the last data frame, or on drop once the data is gone.

use hyper::body::{Body, Bytes, Frame, SizeHint};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

#[derive(Debug)]
pub struct TrackedBody {
    data: Option<Bytes>,
    len: u64,
    written: Option<oneshot::Sender<()>>,
}

impl TrackedBody {
    /// Wrap `data`; the receiver completes once the data has been handed
    /// over. It errors if the body is dropped with the data still unsent.
    pub fn new(data: Bytes) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let body = Self {
            len: data.len() as u64,
            data: (!data.is_empty()).then_some(data),
            written: Some(tx),
        };
        (body, rx)
    }

    fn signal_written(&mut self) {
        if let Some(tx) = self.written.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        if self.data.is_none() {
            self.signal_written();
        }
    }
}

impl Body for TrackedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = this.data.take().map(|data| Ok(Frame::data(data)));
        this.signal_written();
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.len)
    }
}

//! Bounded byte pipe between a background body writer and the transport.
//!
//! The writer awaits once `capacity` chunks are queued, so a large upload is
//! never buffered whole. Dropping (or closing) the writer is end-of-stream;
//! `fail` hands an I/O error to the reader instead.

use bytes::Bytes;
use futures_util::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Default number of in-flight chunks
pub const DEFAULT_PIPE_CAPACITY: usize = 16;

pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    (
        PipeWriter { tx },
        PipeReader {
            inner: ReceiverStream::new(rx),
        },
    )
}

/// Write end of a [`pipe`]
pub struct PipeWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl PipeWriter {
    /// Queue `chunk`, waiting while the pipe is full.
    ///
    /// Fails with `BrokenPipe` once the reader is gone.
    pub async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))
    }

    /// Deliver `err` to the reader and close the pipe
    pub async fn fail(self, err: io::Error) {
        if self.tx.send(Err(err)).await.is_err() {
            log::debug!("pipe reader gone before error could be delivered");
        }
    }

    /// Close the write end; the reader sees end-of-stream after draining
    pub fn close(self) {}
}

/// Read end of a [`pipe`]
pub struct PipeReader {
    inner: ReceiverStream<io::Result<Bytes>>,
}

impl Stream for PipeReader {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

use std::{
    io::{Error as IoError, ErrorKind},
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use bytes::{Buf, Bytes};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    sync::mpsc,
};
use tokio_util::sync::PollSender;

/// Create a bounded in-memory byte pipe.
///
/// `capacity` counts buffered chunks, not bytes. Closing the write half with
/// an error surfaces as a terminal read error on the read half; dropping the
/// read half surfaces as a broken pipe on the write half.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (sender, receiver) = mpsc::channel(capacity);
    let error = Arc::new(Mutex::new(None));

    (
        PipeWriter {
            sender: PollSender::new(sender),
            error: error.clone(),
        },
        PipeReader {
            receiver,
            error,
            buffer: Bytes::new(),
        },
    )
}

pub struct PipeWriter {
    sender: PollSender<Bytes>,
    error: Arc<Mutex<Option<String>>>,
}

impl PipeWriter {
    /// Close the pipe, surfacing `message` as a read error on the read half
    pub fn close_with_error(mut self, message: impl Into<String>) {
        *self.error.lock().expect("Pipe error slot poisoned") = Some(message.into());
        self.sender.close();
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, IoError>> {
        let writer = self.get_mut();

        match writer.sender.poll_reserve(cx) {
            Poll::Ready(Ok(())) => {
                writer
                    .sender
                    .send_item(Bytes::copy_from_slice(buf))
                    .map_err(|_| {
                        IoError::new(ErrorKind::BrokenPipe, "transfer receive half closed")
                    })?;

                Poll::Ready(Ok(buf.len()))
            }
            Poll::Ready(Err(_)) => Poll::Ready(Err(IoError::new(
                ErrorKind::BrokenPipe,
                "transfer receive half closed",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), IoError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), IoError>> {
        self.get_mut().sender.close();
        Poll::Ready(Ok(()))
    }
}

pub struct PipeReader {
    receiver: mpsc::Receiver<Bytes>,
    error: Arc<Mutex<Option<String>>>,
    buffer: Bytes,
}

impl PipeReader {
    fn fill(&mut self, buf: &mut ReadBuf<'_>) {
        let length = self.buffer.len().min(buf.remaining());
        buf.put_slice(&self.buffer[..length]);
        self.buffer.advance(length);
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let reader = self.get_mut();

        if !reader.buffer.is_empty() {
            reader.fill(buf);
            return Poll::Ready(Ok(()));
        }

        match reader.receiver.poll_recv(cx) {
            Poll::Ready(Some(bytes)) => {
                reader.buffer = bytes;
                reader.fill(buf);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(None) => {
                match reader.error.lock().expect("Pipe error slot poisoned").take() {
                    Some(message) => Poll::Ready(Err(IoError::new(ErrorKind::Other, message))),
                    // Clean EOF
                    None => Poll::Ready(Ok(())),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

use std::{
    io::{Cursor, Error, Read},
    pin::Pin,
    task::{Context, Poll},
};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::codec::Encoder;

/// In-memory socket stand-in: everything written is captured in `input`,
/// reads drain a pre-encoded `output` buffer.
#[derive(Default)]
pub struct TestStream {
    input: BytesMut,
    output: Cursor<BytesMut>,
}

impl TestStream {
    pub fn with_output<I, C>(items: Vec<I>, encoder: &mut C) -> Result<Self, <C as Encoder<I>>::Error>
    where
        C: Encoder<I>,
    {
        let mut buf = BytesMut::new();

        for item in items {
            encoder.encode(item, &mut buf)?;
        }

        Ok(TestStream {
            input: BytesMut::new(),
            output: Cursor::new(buf),
        })
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }
}

impl AsyncWrite for TestStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, Error>> {
        self.get_mut().input.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for TestStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let unfilled = buf.initialize_unfilled();
        let read = self.get_mut().output.read(unfilled)?;
        buf.advance(read);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::codec::{Decoder, LinesCodec};

    use super::TestStream;

    #[tokio::test]
    async fn test_input() {
        let mut stream = TestStream::default();
        stream.write_all(b"Hello, world").await.unwrap();
        assert_eq!(stream.input(), b"Hello, world");
    }

    #[tokio::test]
    async fn test_output() {
        let mut codec = LinesCodec::default();
        let mut stream = TestStream::with_output(vec!["123"], &mut codec).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(
            codec.decode(&mut BytesMut::from(&*buf)).unwrap().unwrap(),
            "123"
        );
    }
}

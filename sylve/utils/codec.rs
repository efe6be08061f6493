use bincode::{deserialize, serialize, Error, ErrorKind};
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::node::replication::message::Request;

/// Frames larger than this are rejected before allocation
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LENGTH_PREFIX_SIZE: usize = 4;

/// Length-prefixed bincode codec.
///
/// Control messages and snapshot stream chunks interleave on one connection,
/// so every payload carries a u32 length prefix to delimit frames.
#[derive(Default)]
pub struct BincodeCodec;

impl<I> Encoder<I> for BincodeCodec
where
    I: Serialize,
{
    type Error = Error;

    fn encode(&mut self, item: I, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serialize(&item)?;

        if payload.len() > MAX_FRAME_SIZE {
            return Err(Box::new(ErrorKind::Custom(format!(
                "frame of {} bytes exceeds limit",
                payload.len()
            ))));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

impl Decoder for BincodeCodec {
    type Item = Request;

    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut length = [0u8; LENGTH_PREFIX_SIZE];
        length.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let length = u32::from_be_bytes(length) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(Box::new(ErrorKind::Custom(format!(
                "frame of {} bytes exceeds limit",
                length
            ))));
        }

        if src.len() < LENGTH_PREFIX_SIZE + length {
            src.reserve(LENGTH_PREFIX_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(length);

        Ok(Some(deserialize(&payload)?))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio_util::codec::{Decoder, Encoder};

    use super::BincodeCodec;
    use crate::node::replication::message::{Request, RequestBody, Response};

    fn request() -> Request {
        Request::Client(crate::node::replication::message::ClientRequest {
            token: String::from("token"),
            body: RequestBody::ListDatasets {
                prefix: Some(String::from("tank")),
            },
        })
    }

    #[test]
    fn test_encode_decode_valid_data() {
        let mut buf = BytesMut::default();

        let item = request();

        BincodeCodec.encode(&item, &mut buf).unwrap();

        assert_eq!(item, BincodeCodec.decode(&mut buf).unwrap().unwrap());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut buf = BytesMut::default();

        BincodeCodec.encode(request(), &mut buf).unwrap();

        let mut partial = buf.split_to(buf.len() - 1);
        assert!(BincodeCodec.decode(&mut partial).unwrap().is_none());

        // The remaining byte completes the frame
        partial.unsplit(buf);
        assert_eq!(
            BincodeCodec.decode(&mut partial).unwrap().unwrap(),
            request()
        );
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut buf = BytesMut::default();

        BincodeCodec.encode(request(), &mut buf).unwrap();
        BincodeCodec
            .encode(Request::Server(Response::Done), &mut buf)
            .unwrap();

        assert_eq!(BincodeCodec.decode(&mut buf).unwrap().unwrap(), request());
        assert_eq!(
            BincodeCodec.decode(&mut buf).unwrap().unwrap(),
            Request::Server(Response::Done)
        );
    }

    #[test]
    fn test_decode_oversized_frame() {
        let mut buf = BytesMut::default();
        buf.extend_from_slice(&u32::MAX.to_be_bytes());
        buf.extend_from_slice(b"data");

        BincodeCodec.decode(&mut buf).unwrap_err();
    }
}

//! Length-delimited framing for [`Envelope`](super::protocol::Envelope)s
//! (§4.1, §9 "ASN.1-like framing").
//!
//! Every frame on the wire is `[u32 BE frame_len][frame_len bytes of tagged
//! envelope]`. Decoding waits for a whole frame before attempting to parse
//! its fields, so a truncated envelope never causes a spurious parse error —
//! only a malformed *complete* frame does (§7, "Protocol violation").

use std::{error, fmt, io};

use bytes::Buf;
use tokio_util::codec;

use super::protocol::Envelope;

/// Frames larger than this are rejected outright as a protocol violation,
/// the same defensive posture the teacher's command-line decoder takes with
/// its 224-byte command cap.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct Decoder;

impl codec::Decoder for Decoder {
    type Item = Envelope;
    type Error = Error;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let frame_len = u32::from_be_bytes(src[..4].try_into().unwrap());
        if frame_len > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge(frame_len));
        }

        let total = 4 + frame_len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        // Panic safety: split_to requires src.len() >= total, asserted above.
        let mut frame = src.split_to(total);
        frame.advance(4);

        let mut body = &frame[..];
        let envelope = Envelope::decode_from(&mut body).map_err(Error::Malformed)?;
        Ok(Some(envelope))
    }
}

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    FrameTooLarge(u32),
    Malformed(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::IO(value)
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;
    use tokio_util::codec::{Encoder as _, FramedRead};

    use super::*;
    use crate::wire::encoder::Encoder;
    use crate::wire::protocol::MessageBody;

    #[tokio::test]
    async fn decodes_one_frame_at_a_time() {
        let mut raw = bytes::BytesMut::new();
        let mut enc = Encoder::default();
        enc.encode(Envelope::new(1, MessageBody::KeepAlive), &mut raw).unwrap();
        enc.encode(Envelope::new(2, MessageBody::StatusRequest), &mut raw).unwrap();

        let mut framed = FramedRead::new(&raw[..], Decoder);
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            Envelope::new(1, MessageBody::KeepAlive)
        );
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            Envelope::new(2, MessageBody::StatusRequest)
        );
        assert!(framed.next().await.is_none());
    }

    #[tokio::test]
    async fn waits_for_a_full_frame_before_decoding() {
        let mut raw = bytes::BytesMut::new();
        let mut enc = Encoder::default();
        enc.encode(Envelope::new(1, MessageBody::KeepAlive), &mut raw).unwrap();

        // Feed one byte at a time; only the final byte should yield an item.
        let (first, last) = raw.split_at(raw.len() - 1);
        let mut combined = bytes::BytesMut::from(first);
        combined.extend_from_slice(last);

        let mut framed = FramedRead::new(&combined[..], Decoder);
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            Envelope::new(1, MessageBody::KeepAlive)
        );
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut raw = bytes::BytesMut::new();
        raw.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());

        let mut framed = FramedRead::new(&raw[..], Decoder);
        assert!(matches!(framed.next().await, Some(Err(Error::FrameTooLarge(_)))));
    }
}

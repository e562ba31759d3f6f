use std::{error, fmt, io};

use bytes::BufMut;
use tokio_util::codec;

use super::protocol::Envelope;

/// An encoder producing length-delimited SLAMD envelope frames.
#[derive(Debug, Default)]
pub struct Encoder {}

impl codec::Encoder<Envelope> for Encoder {
    type Error = Error;

    fn encode(&mut self, item: Envelope, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        let mut body = bytes::BytesMut::new();
        item.encode_into(&mut body);

        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
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

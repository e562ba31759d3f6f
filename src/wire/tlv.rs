//! Primitive TLV value encoding shared by [`super::encoder`] and
//! [`super::decoder`] (§4.1, §9 "ASN.1-like framing").
//!
//! Integers are signed, big-endian, and variable-length: a tag byte, a
//! one-byte length, then that many big-endian two's-complement bytes.
//! Strings and opaque byte strings are a tag byte, a `u32` big-endian
//! length, then the raw octets. Booleans, null, and sequences each carry
//! just a tag (plus, for sequences, a `u32` element count and then each
//! element's own TLV-encoded bytes).
//!
//! No BER/DER compliance is implied or required (§9): this only needs to
//! round-trip exactly what this crate itself writes.

use std::io;

use bytes::{Buf, BufMut, BytesMut};

pub mod vtag {
    pub const NULL: u8 = 0x00;
    pub const BOOL_FALSE: u8 = 0x01;
    pub const BOOL_TRUE: u8 = 0x02;
    pub const INTEGER: u8 = 0x03;
    pub const STRING: u8 = 0x04;
    pub const BYTES: u8 = 0x05;
}

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "truncated TLV value")
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

pub fn put_bool(dst: &mut BytesMut, v: bool) {
    dst.put_u8(if v { vtag::BOOL_TRUE } else { vtag::BOOL_FALSE });
}

pub fn get_bool(src: &mut impl Buf) -> io::Result<bool> {
    if !src.has_remaining() {
        return Err(eof());
    }
    match src.get_u8() {
        vtag::BOOL_TRUE => Ok(true),
        vtag::BOOL_FALSE => Ok(false),
        _ => Err(invalid("expected boolean tag")),
    }
}

/// Minimal big-endian two's-complement encoding of `v`, using the fewest
/// bytes that round-trip its sign (mirrors how ASN.1 INTEGER minimises its
/// content octets).
fn minimal_be_bytes(v: i64) -> Vec<u8> {
    if v == 0 {
        return vec![0];
    }
    let full = v.to_be_bytes();
    let is_negative = v < 0;
    let mut start = 0;
    while start < 7 {
        let byte = full[start];
        let next = full[start + 1];
        let redundant = if is_negative {
            byte == 0xff && next & 0x80 != 0
        } else {
            byte == 0x00 && next & 0x80 == 0
        };
        if redundant {
            start += 1;
        } else {
            break;
        }
    }
    full[start..].to_vec()
}

pub fn put_integer(dst: &mut BytesMut, v: i64) {
    let bytes = minimal_be_bytes(v);
    dst.put_u8(vtag::INTEGER);
    dst.put_u8(bytes.len() as u8);
    dst.extend_from_slice(&bytes);
}

pub fn get_integer(src: &mut impl Buf) -> io::Result<i64> {
    if src.remaining() < 2 {
        return Err(eof());
    }
    let tag = src.get_u8();
    if tag != vtag::INTEGER {
        return Err(invalid("expected integer tag"));
    }
    let len = src.get_u8() as usize;
    if len == 0 || len > 8 || src.remaining() < len {
        return Err(eof());
    }
    let mut tmp = vec![0u8; len];
    src.copy_to_slice(&mut tmp);
    let fill = if tmp[0] & 0x80 != 0 { 0xff } else { 0x00 };

    let mut buf = [fill; 8];
    buf[8 - len..].copy_from_slice(&tmp);
    Ok(i64::from_be_bytes(buf))
}

pub fn put_string(dst: &mut BytesMut, s: &str) {
    dst.put_u8(vtag::STRING);
    dst.put_u32(s.len() as u32);
    dst.put_slice(s.as_bytes());
}

pub fn get_string(src: &mut impl Buf) -> io::Result<String> {
    if src.remaining() < 5 {
        return Err(eof());
    }
    let tag = src.get_u8();
    if tag != vtag::STRING {
        return Err(invalid("expected string tag"));
    }
    let len = src.get_u32() as usize;
    if src.remaining() < len {
        return Err(eof());
    }
    let mut buf = vec![0u8; len];
    src.copy_to_slice(&mut buf);
    String::from_utf8(buf).map_err(|_| invalid("string is not valid UTF-8"))
}

pub fn put_bytes(dst: &mut BytesMut, b: &[u8]) {
    dst.put_u8(vtag::BYTES);
    dst.put_u32(b.len() as u32);
    dst.put_slice(b);
}

pub fn get_bytes(src: &mut impl Buf) -> io::Result<Vec<u8>> {
    if src.remaining() < 5 {
        return Err(eof());
    }
    let tag = src.get_u8();
    if tag != vtag::BYTES {
        return Err(invalid("expected bytes tag"));
    }
    let len = src.get_u32() as usize;
    if src.remaining() < len {
        return Err(eof());
    }
    let mut buf = vec![0u8; len];
    src.copy_to_slice(&mut buf);
    Ok(buf)
}

pub fn put_opt_string(dst: &mut BytesMut, s: &Option<String>) {
    match s {
        Some(s) => put_string(dst, s),
        None => dst.put_u8(vtag::NULL),
    }
}

pub fn get_opt_string(src: &mut impl Buf) -> io::Result<Option<String>> {
    if !src.has_remaining() {
        return Err(eof());
    }
    if src.chunk()[0] == vtag::NULL {
        src.advance(1);
        Ok(None)
    } else {
        get_string(src).map(Some)
    }
}

pub fn put_opt_integer(dst: &mut BytesMut, v: &Option<i64>) {
    match v {
        Some(v) => put_integer(dst, *v),
        None => dst.put_u8(vtag::NULL),
    }
}

pub fn get_opt_integer(src: &mut impl Buf) -> io::Result<Option<i64>> {
    if !src.has_remaining() {
        return Err(eof());
    }
    if src.chunk()[0] == vtag::NULL {
        src.advance(1);
        Ok(None)
    } else {
        get_integer(src).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_int(v: i64) {
        let mut buf = BytesMut::new();
        put_integer(&mut buf, v);
        let mut reader = &buf[..];
        assert_eq!(get_integer(&mut reader).unwrap(), v);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn integers_round_trip() {
        for v in [
            0,
            1,
            -1,
            127,
            128,
            -128,
            -129,
            i64::MAX,
            i64::MIN,
            1_000_000_000,
            -1_000_000_000,
        ] {
            roundtrip_int(v);
        }
    }

    #[test]
    fn strings_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "hello, slamd");
        let mut reader = &buf[..];
        assert_eq!(get_string(&mut reader).unwrap(), "hello, slamd");
    }

    #[test]
    fn optionals_round_trip() {
        let mut buf = BytesMut::new();
        put_opt_string(&mut buf, &Some("x".to_owned()));
        put_opt_string(&mut buf, &None);
        let mut reader = &buf[..];
        assert_eq!(get_opt_string(&mut reader).unwrap(), Some("x".to_owned()));
        assert_eq!(get_opt_string(&mut reader).unwrap(), None);
    }

    #[test]
    fn bools_round_trip() {
        let mut buf = BytesMut::new();
        put_bool(&mut buf, true);
        put_bool(&mut buf, false);
        let mut reader = &buf[..];
        assert!(get_bool(&mut reader).unwrap());
        assert!(!get_bool(&mut reader).unwrap());
    }
}

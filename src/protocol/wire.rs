//! Bounds-checked primitive readers and writers
//!
//! All integers are written in network byte order. Variable-length fields
//! carry a `u16` length prefix. Readers never panic on short input; they
//! return [`CodecError::Truncated`] instead so a malformed peer can be
//! disconnected cleanly.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

pub fn get_u8(buf: &mut Bytes) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut Bytes) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u16())
}

pub fn get_u32(buf: &mut Bytes) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u32())
}

pub fn get_f32(buf: &mut Bytes) -> Result<f32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_f32())
}

pub fn get_bool(buf: &mut Bytes) -> Result<bool, CodecError> {
    Ok(get_u8(buf)? != 0)
}

/// Read a `u16`-length-prefixed byte blob
pub fn get_blob(buf: &mut Bytes) -> Result<Bytes, CodecError> {
    let len = get_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    Ok(buf.split_to(len))
}

/// Read a `u16`-length-prefixed UTF-8 string
pub fn get_string(buf: &mut Bytes) -> Result<String, CodecError> {
    let blob = get_blob(buf)?;
    String::from_utf8(blob.to_vec()).map_err(|_| CodecError::InvalidString)
}

pub fn put_blob(buf: &mut BytesMut, data: &[u8]) {
    debug_assert!(data.len() <= u16::MAX as usize);
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
}

pub fn put_string(buf: &mut BytesMut, s: &str) {
    put_blob(buf, s.as_bytes());
}

pub fn put_bool(buf: &mut BytesMut, v: bool) {
    buf.put_u8(u8::from(v));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "SM0XYZ");
        let mut bytes = buf.freeze();
        assert_eq!(get_string(&mut bytes).unwrap(), "SM0XYZ");
        assert!(bytes.is_empty());
    }

    #[test]
    fn truncated_string_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(10);
        buf.put_slice(b"abc");
        let mut bytes = buf.freeze();
        assert_eq!(get_string(&mut bytes), Err(CodecError::Truncated));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut buf = BytesMut::new();
        put_blob(&mut buf, &[0xff, 0xfe, 0xfd]);
        let mut bytes = buf.freeze();
        assert_eq!(get_string(&mut bytes), Err(CodecError::InvalidString));
    }

    #[test]
    fn short_integer_reads_fail() {
        let mut bytes = Bytes::from_static(&[0x01]);
        assert_eq!(get_u16(&mut bytes.clone()), Err(CodecError::Truncated));
        assert_eq!(get_u32(&mut bytes), Err(CodecError::Truncated));
    }
}

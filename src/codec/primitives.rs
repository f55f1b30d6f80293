use bytes::{Buf, BufMut, BytesMut};

use super::CodecError;

/// Writes an unsigned LEB128 varint, used for the frame's length fields to
/// keep small messages cheap without capping the maximum size up front.
pub fn put_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Reads a varint written by [`put_varint`], consuming only the bytes that
/// belong to it from the front of `buf`.
pub fn get_varint(buf: &mut impl Buf) -> Result<u64, CodecError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(CodecError::Truncated);
        }
        if shift >= 64 {
            return Err(CodecError::VarintOverflow);
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    put_varint(buf, data.len() as u64);
    buf.put_slice(data);
}

pub fn get_bytes(buf: &mut impl Buf, max_len: usize) -> Result<Vec<u8>, CodecError> {
    let len = get_varint(buf)? as usize;
    if len > max_len {
        return Err(CodecError::FieldTooLarge { len, max_len });
    }
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

pub fn get_string(buf: &mut impl Buf, max_len: usize) -> Result<String, CodecError> {
    let bytes = get_bytes(buf, max_len)?;
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trips_boundary_values() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            let mut cursor = &buf[..];
            let decoded = get_varint(&mut cursor).unwrap();
            assert_eq!(decoded, value);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn bytes_round_trip() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, b"hello world");
        let mut cursor = &buf[..];
        let decoded = get_bytes(&mut cursor, 1024).unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn bytes_over_max_len_rejected() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &[0u8; 10]);
        let mut cursor = &buf[..];
        assert!(matches!(
            get_bytes(&mut cursor, 4),
            Err(CodecError::FieldTooLarge { .. })
        ));
    }
}

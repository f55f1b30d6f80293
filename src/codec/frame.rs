use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::CodecError;

pub const PROTOCOL_VERSION: u8 = 1;
const HEADER_LEN: usize = 1 + 1 + 1 + 2 + 4 + 4;
/// Default upper bound on a single frame's total length, used when a codec
/// is built with [`FrameCodec::new`]; callers that need a different limit
/// should go through [`FrameCodec::with_max_frame_len`] and thread the
/// configured value from `P2pConfig::max_frame_len`.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressFlag {
    None,
}

impl CompressFlag {
    fn to_u8(self) -> u8 {
        match self {
            CompressFlag::None => 0,
        }
    }

    fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(CompressFlag::None),
            other => Err(CodecError::UnsupportedCompression(other)),
        }
    }
}

/// A single wire frame: a fixed header followed by `bodyLength` bytes of
/// payload. `totalLength` is redundant with `bodyLength` (it equals
/// `HEADER_LEN + bodyLength`) but is carried on the wire so a receiver can
/// validate framing integrity without recomputing it, the way the crate
/// this is grounded on validates its own frame/body length pair.
#[derive(Debug, Clone)]
pub struct Frame {
    pub version: u8,
    pub compress_flag: CompressFlag,
    pub packet_type: u8,
    pub sequence: u16,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(packet_type: u8, sequence: u16, body: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            compress_flag: CompressFlag::None,
            packet_type,
            sequence,
            body,
        }
    }
}

/// `tokio_util::codec::{Encoder, Decoder}` pair for [`Frame`], meant to be
/// used inside a `Framed<TcpStream, FrameCodec>` exactly like the RLPx codec
/// this is grounded on is used, minus any encryption: this transport layer
/// authenticates peers at the handshake step instead of encrypting frames.
#[derive(Debug)]
pub struct FrameCodec {
    next_sequence: u16,
    max_frame_len: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Builds a codec using [`DEFAULT_MAX_FRAME_LEN`]; prefer
    /// [`Self::with_max_frame_len`] wherever a `P2pConfig` is in scope, so
    /// the limit stays configured rather than hardcoded.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: u32) -> Self {
        Self {
            next_sequence: 0,
            max_frame_len,
        }
    }

    pub fn next_outbound_sequence(&mut self) -> u16 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_len = frame.body.len();
        if body_len > self.max_frame_len as usize - HEADER_LEN {
            return Err(CodecError::FieldTooLarge {
                len: body_len,
                max_len: self.max_frame_len as usize - HEADER_LEN,
            });
        }
        let total_len = (HEADER_LEN + body_len) as u32;

        dst.put_u8(frame.version);
        dst.put_u8(frame.compress_flag.to_u8());
        dst.put_u8(frame.packet_type);
        dst.put_u16(frame.sequence);
        dst.put_u32(body_len as u32);
        dst.put_u32(total_len);
        dst.put_slice(&frame.body);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let version = header.get_u8();
        let compress_flag = CompressFlag::from_u8(header.get_u8())?;
        let packet_type = header.get_u8();
        let sequence = header.get_u16();
        let body_len = header.get_u32();
        let total_len = header.get_u32();

        if total_len != HEADER_LEN as u32 + body_len {
            return Err(CodecError::InconsistentLength {
                body_len,
                total_len,
            });
        }
        if total_len > self.max_frame_len {
            return Err(CodecError::FieldTooLarge {
                len: total_len as usize,
                max_len: self.max_frame_len as usize,
            });
        }

        let frame_len = HEADER_LEN + body_len as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut full = src.split_to(frame_len);
        full.advance(HEADER_LEN);
        let body = full.to_vec();

        Ok(Some(Frame {
            version,
            compress_flag,
            packet_type,
            sequence,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_codec() {
        let mut codec = FrameCodec::new();
        let frame = Frame::new(7, 42, b"hello".to_vec());
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.packet_type, frame.packet_type);
        assert_eq!(decoded.sequence, frame.sequence);
        assert_eq!(decoded.body, frame.body);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = FrameCodec::new();
        let frame = Frame::new(1, 0, vec![1, 2, 3, 4, 5]);
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();

        let mut partial = buf.split_to(HEADER_LEN + 2);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_inconsistent_length() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(0);
        buf.put_u8(1);
        buf.put_u16(0);
        buf.put_u32(3);
        buf.put_u32(999);
        buf.put_slice(b"abc");

        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::InconsistentLength { .. })
        ));
    }
}

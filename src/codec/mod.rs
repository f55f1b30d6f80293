pub mod frame;
pub mod primitives;

use thiserror::Error;

pub use frame::{CompressFlag, Frame, FrameCodec, DEFAULT_MAX_FRAME_LEN, PROTOCOL_VERSION};
pub use primitives::{get_bytes, get_string, get_varint, put_bytes, put_string, put_varint};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer truncated before a complete value could be read")]
    Truncated,
    #[error("varint exceeds 64 bits")]
    VarintOverflow,
    #[error("field of {len} bytes exceeds limit of {max_len}")]
    FieldTooLarge { len: usize, max_len: usize },
    #[error("string field was not valid utf-8")]
    InvalidUtf8,
    #[error("compress flag {0} is not supported")]
    UnsupportedCompression(u8),
    #[error("frame header claims total length {total_len} inconsistent with body length {body_len}")]
    InconsistentLength { body_len: u32, total_len: u32 },
    #[error("unknown message type byte {0}")]
    UnknownMessageType(u8),
}

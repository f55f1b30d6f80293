use bytes::{Buf, BufMut, BytesMut};

use crate::codec::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub nonce: u64,
}

impl Ping {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.nonce);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < 8 {
            return Err(CodecError::Truncated);
        }
        Ok(Self {
            nonce: data.get_u64(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub nonce: u64,
}

impl Pong {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.nonce);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < 8 {
            return Err(CodecError::Truncated);
        }
        Ok(Self {
            nonce: data.get_u64(),
        })
    }
}

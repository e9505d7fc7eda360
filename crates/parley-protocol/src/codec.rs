//! Length-delimited JSON codec for TCP streams.
//!
//! Wire format: 4-byte big-endian length prefix + UTF-8 JSON payload.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::Message;
use crate::{ProtocolError, MAX_MESSAGE_BYTES};

/// Length prefix size in bytes.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for framing Message values over a byte stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least the length prefix
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > MAX_MESSAGE_BYTES {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_MESSAGE_BYTES,
            });
        }

        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let msg_bytes = src.split_to(length);

        let message: Message = serde_json::from_slice(&msg_bytes)?;
        Ok(Some(message))
    }
}

impl<'a> Encoder<&'a Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(item)?;

        if payload.len() > MAX_MESSAGE_BYTES {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_BYTES,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

/// Encode one message into a standalone frame.
pub fn encode_frame(message: &Message) -> Result<BytesMut, ProtocolError> {
    let mut buf = BytesMut::new();
    MessageCodec.encode(message, &mut buf)?;
    Ok(buf)
}

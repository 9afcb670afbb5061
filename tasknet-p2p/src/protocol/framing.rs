//! Length-prefixed framing codec.
//!
//! Frames are laid out as:
//! - 4 bytes: network magic
//! - 4 bytes: big-endian body length
//! - N bytes: bincode-serialized body
//!
//! The codec is generic over the body type; the control stream uses it
//! for envelopes.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{MAX_MESSAGE_SIZE, NETWORK_MAGIC};
use crate::error::{P2pError, P2pResult};
use crate::protocol::Envelope;

/// Header size: 4 bytes magic + 4 bytes length.
const HEADER_SIZE: usize = 8;

/// Codec for the control stream.
pub type MessageCodec = FrameCodec<Envelope>;

/// Codec for length-prefixed frames of `T`.
#[derive(Debug)]
pub struct FrameCodec<T> {
    /// Body length of the current frame, once its header has been read.
    current_length: Option<usize>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FrameCodec<T> {
    /// Create a new codec.
    pub fn new() -> Self {
        Self {
            current_length: None,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for FrameCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for FrameCodec<T> {
    type Item = T;
    type Error = P2pError;

    fn decode(&mut self, src: &mut BytesMut) -> P2pResult<Option<T>> {
        let length = match self.current_length {
            Some(length) => length,
            None => {
                if src.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let mut magic = [0u8; 4];
                magic.copy_from_slice(&src[0..4]);
                if magic != NETWORK_MAGIC {
                    return Err(P2pError::InvalidMagic {
                        expected: NETWORK_MAGIC,
                        actual: magic,
                    });
                }

                let mut len_bytes = [0u8; 4];
                len_bytes.copy_from_slice(&src[4..8]);
                let length = u32::from_be_bytes(len_bytes) as usize;
                if length > MAX_MESSAGE_SIZE {
                    return Err(P2pError::MessageTooLarge {
                        size: length,
                        max: MAX_MESSAGE_SIZE,
                    });
                }

                self.current_length = Some(length);
                length
            }
        };

        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(length);
        self.current_length = None;

        let item = tasknet_core::serialization::deserialize(&body)?;
        Ok(Some(item))
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec<T> {
    type Error = P2pError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> P2pResult<()> {
        let body = tasknet_core::serialization::serialize(&item)?;
        let length = body.len();

        if length > MAX_MESSAGE_SIZE {
            return Err(P2pError::MessageTooLarge {
                size: length,
                max: MAX_MESSAGE_SIZE,
            });
        }

        dst.reserve(HEADER_SIZE + length);
        dst.put_slice(&NETWORK_MAGIC);
        dst.put_u32(length as u32);
        dst.put_slice(&body);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{InfoMessage, Message, PongMessage};

    fn envelope(id: u64, message: Message) -> Envelope {
        Envelope {
            id,
            reply_to: None,
            message,
        }
    }

    #[test]
    fn test_roundtrip_info() {
        let mut codec = MessageCodec::new();
        let original = envelope(
            3,
            Message::Info(InfoMessage {
                name: Some("x-1".into()),
                addresses: vec!["/ip4/127.0.0.1/tcp/4001".into()],
            }),
        );

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_partial_header() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.put_slice(&NETWORK_MAGIC);

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_partial_body_then_rest() {
        let mut codec = MessageCodec::new();
        let mut full = BytesMut::new();
        codec.encode(envelope(1, Message::Ping), &mut full).unwrap();

        let mut buf = BytesMut::new();
        buf.put_slice(&full[..full.len() - 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put_slice(&full[full.len() - 2..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.message, Message::Ping);
    }

    #[test]
    fn test_invalid_magic() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();

        buf.put_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        buf.put_u32(10);
        buf.put_slice(&[0u8; 10]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(P2pError::InvalidMagic { .. })));
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();

        buf.put_slice(&NETWORK_MAGIC);
        buf.put_u32((MAX_MESSAGE_SIZE + 1) as u32);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(P2pError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_multiple_frames() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(envelope(1, Message::Ping), &mut buf).unwrap();
        codec
            .encode(envelope(2, Message::Pong(PongMessage { time: 9 })), &mut buf)
            .unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().id, 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().id, 2);
        assert!(buf.is_empty());
    }
}

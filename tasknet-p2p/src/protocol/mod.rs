//! Control-stream protocol.
//!
//! This module contains:
//! - Message definitions for the handshake and session messages
//! - Length-prefixed framing codec

pub mod framing;
pub mod messages;

pub use framing::{FrameCodec, MessageCodec};
pub use messages::{AuthMessage, Envelope, InfoMessage, Message, MessageKind, PongMessage};

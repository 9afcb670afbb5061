//! Control-stream messages.
//!
//! Every frame on the control stream carries an [`Envelope`]: a sender-local
//! id, an optional id of the message it answers, and the typed body.

use std::fmt;

use serde::{Deserialize, Serialize};
use tasknet_core::NetAuth;

use crate::peer::PeerType;

/// First handshake phase: who the sender is and, optionally, its token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthMessage {
    /// Declared role of the sender.
    pub peer_type: PeerType,
    /// Token proving membership in the network, bound to the receiver's key.
    pub auth: Option<NetAuth>,
}

/// Second handshake phase: descriptive details about the sender.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InfoMessage {
    /// Human-readable node name.
    pub name: Option<String>,
    /// Addresses the sender can be reached on.
    pub addresses: Vec<String>,
}

/// Reply to a ping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PongMessage {
    /// Responder's clock, unix milliseconds.
    pub time: u64,
}

/// Control-stream message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Message {
    /// `peer:auth`
    Auth(AuthMessage),
    /// `peer:info`
    Info(InfoMessage),
    /// `ping`
    Ping,
    /// `pong`
    Pong(PongMessage),
}

/// Type tag of a [`Message`], used to route and await messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `peer:auth`
    Auth,
    /// `peer:info`
    Info,
    /// `ping`
    Ping,
    /// `pong`
    Pong,
}

impl Message {
    /// Type tag of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Auth(_) => MessageKind::Auth,
            Message::Info(_) => MessageKind::Info,
            Message::Ping => MessageKind::Ping,
            Message::Pong(_) => MessageKind::Pong,
        }
    }
}

impl MessageKind {
    /// Wire-level name of the message type.
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Auth => "peer:auth",
            MessageKind::Info => "peer:info",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Framed unit on the control stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    /// Sender-local message id.
    pub id: u64,
    /// Id of the message this one answers.
    pub reply_to: Option<u64>,
    /// Message body.
    pub message: Message,
}

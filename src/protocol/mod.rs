//! Wire formats
//!
//! - Device side: preamble, per-stream metadata and framed media packets
//! - Client side: JSON messages and tagged binary frames

pub mod constants;
pub mod frame;
pub mod message;
pub mod packet;

use bytes::Bytes;

pub use frame::OutboundFrame;
pub use message::ClientMessage;
pub use packet::PacketHeader;

/// A single item queued for the client transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text message
    Text(String),
    /// Binary frame
    Binary(Bytes),
}

impl Outbound {
    /// Serialize a JSON message
    pub fn json(message: &ClientMessage) -> crate::error::Result<Self> {
        Ok(Outbound::Text(serde_json::to_string(message)?))
    }

    /// Decode a text item back into a message (client side and tests)
    pub fn as_message(&self) -> Option<ClientMessage> {
        match self {
            Outbound::Text(text) => serde_json::from_str(text).ok(),
            Outbound::Binary(_) => None,
        }
    }
}

impl From<OutboundFrame> for Outbound {
    fn from(frame: OutboundFrame) -> Self {
        Outbound::Binary(frame.encode())
    }
}

//! Device connection handle
//!
//! Each TCP connection from the device agent moves through:
//!
//! ```text
//! AwaitingInitial -> AwaitingMetadata -> Streaming
//!        \                  \
//!         +------------------+--> Unknown (terminal, connection destroyed)
//! ```

use super::options::StreamRole;
use crate::buffer::DynamicBuffer;

/// Connection id, unique within a session
pub type ConnId = u64;

/// Parse state of a device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the device name preamble (or for another connection to consume it)
    AwaitingInitial,
    /// Waiting for codec metadata, or for control-by-elimination
    AwaitingMetadata,
    /// Classified; payload goes to the reframer for the connection's role
    Streaming,
    /// Protocol violation; the connection is destroyed
    Unknown,
}

/// A device connection as seen by the demultiplexer
#[derive(Debug)]
pub struct Connection {
    pub id: ConnId,
    pub state: ConnectionState,
    /// `None` until classified
    pub role: Option<StreamRole>,
    pub buffer: DynamicBuffer,
    /// This connection consumed the device name preamble
    pub handled_preamble: bool,
    pub bytes_received: u64,
}

impl Connection {
    pub fn new(id: ConnId, baseline: usize) -> Self {
        Self {
            id,
            state: ConnectionState::AwaitingInitial,
            role: None,
            buffer: DynamicBuffer::with_baseline(baseline),
            handled_preamble: false,
            bytes_received: 0,
        }
    }

    /// Not yet classified and still alive
    pub fn is_unidentified(&self) -> bool {
        self.role.is_none() && self.state != ConnectionState::Unknown
    }

    /// Assign a role and enter the streaming state
    pub fn classify(&mut self, role: StreamRole) {
        self.role = Some(role);
        self.state = ConnectionState::Streaming;
    }

    /// Mark as protocol violator
    pub fn reject(&mut self) {
        self.state = ConnectionState::Unknown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connection_is_unidentified() {
        let conn = Connection::new(1, 64);
        assert_eq!(conn.state, ConnectionState::AwaitingInitial);
        assert!(conn.is_unidentified());
        assert!(!conn.handled_preamble);
    }

    #[test]
    fn test_classify_and_reject() {
        let mut conn = Connection::new(1, 64);
        conn.classify(StreamRole::Audio);
        assert_eq!(conn.state, ConnectionState::Streaming);
        assert!(!conn.is_unidentified());

        let mut bad = Connection::new(2, 64);
        bad.reject();
        assert_eq!(bad.state, ConnectionState::Unknown);
        assert!(!bad.is_unidentified());
    }
}

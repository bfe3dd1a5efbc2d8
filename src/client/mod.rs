//! Browser client transport
//!
//! The relay hands everything meant for the browser to an `mpsc` channel of
//! [`Outbound`] items; whatever owns the receiving end (a WebSocket writer,
//! a test) delivers them. Sends never wait: a client that stops draining its
//! channel loses items instead of stalling the session. Failures are logged
//! and never end a session.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use crate::protocol::{ClientMessage, Outbound, OutboundFrame};

/// Sending side of a client connection, bound to one session
#[derive(Debug, Clone)]
pub struct ClientSink {
    scid: String,
    tx: mpsc::Sender<Outbound>,
    closed: bool,
    lagging: bool,
    dropped: u64,
}

impl ClientSink {
    pub fn new(scid: impl Into<String>, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            scid: scid.into(),
            tx,
            closed: false,
            lagging: false,
            dropped: 0,
        }
    }

    /// Send a JSON message
    pub fn send_message(&mut self, message: &ClientMessage) -> bool {
        match Outbound::json(message) {
            Ok(item) => self.send(item),
            Err(e) => {
                warn!(scid = %self.scid, error = %e, "Failed to serialize client message");
                false
            }
        }
    }

    /// Send a binary frame
    pub fn send_frame(&mut self, frame: OutboundFrame) -> bool {
        self.send(Outbound::from(frame))
    }

    fn send(&mut self, item: Outbound) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => {
                if self.lagging {
                    self.lagging = false;
                    info!(scid = %self.scid, dropped = self.dropped, "Client caught up");
                }
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                // Log once per stall
                if !self.lagging {
                    self.lagging = true;
                    warn!(scid = %self.scid, "Client send failed: channel full, dropping");
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped += 1;
                // Log the first failure only
                if !self.closed {
                    self.closed = true;
                    warn!(scid = %self.scid, "Client send failed: receiver closed");
                }
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.tx.is_closed()
    }

    /// Items dropped because the client was gone or not keeping up
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_send_message_and_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = ClientSink::new("0000abcd", tx);

        assert!(sink.send_message(&ClientMessage::status("Streaming started")));
        assert!(sink.send_frame(OutboundFrame::AudioConfig {
            raw: Bytes::from_static(&[0x12, 0x10]),
        }));

        assert_eq!(
            rx.recv().await.unwrap().as_message(),
            Some(ClientMessage::status("Streaming started"))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            Outbound::Binary(Bytes::from_static(&[5, 0x12, 0x10]))
        );
    }

    #[tokio::test]
    async fn test_closed_receiver_is_not_fatal() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = ClientSink::new("0000abcd", tx);

        assert!(!sink.send_message(&ClientMessage::error("boom")));
        assert!(!sink.send_message(&ClientMessage::error("boom")));
        assert!(sink.is_closed());
        assert_eq!(sink.dropped(), 2);
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_waiting() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ClientSink::new("0000abcd", tx);

        assert!(sink.send_message(&ClientMessage::status("Streaming started")));
        assert!(!sink.send_message(&ClientMessage::status("dropped")));
        assert!(!sink.send_message(&ClientMessage::status("dropped")));
        assert_eq!(sink.dropped(), 2);
        assert!(!sink.is_closed());

        // Draining lets later items through
        assert_eq!(
            rx.recv().await.unwrap().as_message(),
            Some(ClientMessage::status("Streaming started"))
        );
        assert!(sink.send_message(&ClientMessage::status("Streaming stopped by server cleanup")));
        assert_eq!(
            rx.recv().await.unwrap().as_message(),
            Some(ClientMessage::status("Streaming stopped by server cleanup"))
        );
        assert_eq!(sink.dropped(), 2);
    }
}

//! Session entry and command types
//!
//! An entry is the registry's view of a live session: enough to address its
//! task and describe it. All other session state is owned by the task.

use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::session::StreamSet;

/// Commands accepted by a running session task
#[derive(Debug)]
pub enum SessionCommand {
    /// Client control input for the control worker
    Control(Bytes),
    /// Tear the session down; the sender is acknowledged afterwards
    Stop(oneshot::Sender<()>),
}

/// Registry entry for one session
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Session id (8 hex characters)
    pub scid: String,

    /// Device serial
    pub device_id: String,

    /// Local listener port, 0 until bound
    pub port: u16,

    /// Requested streams
    pub streams: StreamSet,

    /// Command channel into the session task
    pub(crate) commands: mpsc::Sender<SessionCommand>,

    /// When the session was registered
    pub created_at: Instant,
}

impl SessionEntry {
    pub fn new(
        scid: impl Into<String>,
        device_id: impl Into<String>,
        streams: StreamSet,
        commands: mpsc::Sender<SessionCommand>,
    ) -> Self {
        Self {
            scid: scid.into(),
            device_id: device_id.into(),
            port: 0,
            streams,
            commands,
            created_at: Instant::now(),
        }
    }

    /// Public snapshot of the entry
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            scid: self.scid.clone(),
            device_id: self.device_id.clone(),
            port: self.port,
            streams: self.streams,
        }
    }
}

/// Description of a started session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub scid: String,
    pub device_id: String,
    pub port: u16,
    pub streams: StreamSet,
}

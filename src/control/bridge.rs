//! Control relay bridge
//!
//! Owns the control worker and the write half of the device control
//! connection. Client input goes to the worker, worker output goes to the
//! device.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::worker::{ControlWorker, WorkerEvent};
use crate::error::{Result, SessionError};
use crate::protocol::constants::{CONTROL_MSG_TYPE_SET_SCREEN_POWER_MODE, SCREEN_POWER_MODE_OFF};
use crate::session::ConnId;

/// Worker plus control connection writer for one session
pub struct ControlBridge<W> {
    scid: String,
    worker: Option<ControlWorker>,
    writer: Option<(ConnId, W)>,
}

impl<W: AsyncWrite + Unpin + Send> ControlBridge<W> {
    pub fn new(scid: impl Into<String>) -> Self {
        Self {
            scid: scid.into(),
            worker: None,
            writer: None,
        }
    }

    /// Bind the classified control connection and its worker
    pub fn attach(&mut self, id: ConnId, writer: W, worker: ControlWorker) {
        if let Some(old) = self.worker.replace(worker) {
            old.stop();
        }
        self.writer = Some((id, writer));
        info!(scid = %self.scid, conn = id, "Control stream attached");
    }

    /// Forget the writer if it belongs to `id`; returns whether it did
    pub fn detach(&mut self, id: ConnId) -> bool {
        match self.writer {
            Some((current, _)) if current == id => {
                self.writer = None;
                debug!(scid = %self.scid, conn = id, "Control stream detached");
                true
            }
            _ => false,
        }
    }

    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }

    /// Hand client input to the worker
    pub fn forward(&self, input: Bytes) -> Result<()> {
        match &self.worker {
            Some(worker) => worker.send(input),
            None => Err(SessionError::NoControl(self.scid.clone()).into()),
        }
    }

    /// Next worker event, pending forever while no worker runs
    pub async fn next_event(&mut self) -> WorkerEvent {
        let event = match self.worker.as_mut() {
            Some(worker) => worker.recv().await,
            None => return std::future::pending().await,
        };

        match event {
            Some(event) => {
                if event == WorkerEvent::Exit {
                    self.worker = None;
                }
                event
            }
            None => {
                self.worker = None;
                WorkerEvent::Exit
            }
        }
    }

    /// Write bytes on the control connection
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let (_, writer) = self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "control connection is not available")
        })?;
        writer.write_all(data).await?;
        writer.flush().await
    }

    /// Send the "screen power mode off" control message
    pub async fn turn_screen_off(&mut self) -> io::Result<()> {
        self.write(&[CONTROL_MSG_TYPE_SET_SCREEN_POWER_MODE, SCREEN_POWER_MODE_OFF])
            .await
    }

    /// Stop the worker and drop the writer
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        if self.writer.take().is_some() {
            debug!(scid = %self.scid, "Control writer dropped");
        }
    }
}

impl<W> Drop for ControlBridge<W> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            warn!(scid = %self.scid, "Control bridge dropped with a running worker");
            worker.stop();
        }
    }
}

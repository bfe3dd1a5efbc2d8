//! Input-injection control worker
//!
//! Client control input is handed to a worker task which encodes it and
//! returns the bytes to write on the device control connection. The encoding
//! itself is pluggable through [`ControlCodec`].

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result, SessionError};

/// Turns client control input into device control bytes
pub trait ControlCodec: Send + 'static {
    /// Encode one input message. `Ok(None)` drops it.
    fn encode(&mut self, input: Bytes) -> Result<Option<Bytes>>;
}

/// Forwards input bytes unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCodec;

impl ControlCodec for PassthroughCodec {
    fn encode(&mut self, input: Bytes) -> Result<Option<Bytes>> {
        if input.is_empty() {
            return Ok(None);
        }
        Ok(Some(input))
    }
}

/// Boxed codecs are codecs too
impl ControlCodec for Box<dyn ControlCodec> {
    fn encode(&mut self, input: Bytes) -> Result<Option<Bytes>> {
        (**self).encode(input)
    }
}

/// Worker output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Bytes to write on the control connection
    Write(Bytes),
    /// Encoding failed for one input
    Error(String),
    /// The worker stopped
    Exit,
}

enum WorkerCommand {
    Input(Bytes),
    Stop,
}

/// Handle to a running control worker
#[derive(Debug)]
pub struct ControlWorker {
    commands: mpsc::Sender<WorkerCommand>,
    events: mpsc::Receiver<WorkerEvent>,
    handle: JoinHandle<()>,
}

impl ControlWorker {
    /// Spawn a worker task for a session
    pub fn spawn<C: ControlCodec>(scid: impl Into<String>, codec: C, capacity: usize) -> Self {
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(run_worker(scid.into(), codec, command_rx, event_tx));

        Self {
            commands: command_tx,
            events: event_rx,
            handle,
        }
    }

    /// Queue client input without waiting
    pub fn send(&self, input: Bytes) -> Result<()> {
        self.commands
            .try_send(WorkerCommand::Input(input))
            .map_err(|e| Error::Session(SessionError::ControlCodec(e.to_string())))
    }

    /// Next worker event; `None` once the worker is gone
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    /// Ask the worker to stop; aborts it if the queue is full
    pub fn stop(self) {
        if self.commands.try_send(WorkerCommand::Stop).is_err() {
            self.handle.abort();
        }
    }
}

async fn run_worker<C: ControlCodec>(
    scid: String,
    mut codec: C,
    mut commands: mpsc::Receiver<WorkerCommand>,
    events: mpsc::Sender<WorkerEvent>,
) {
    debug!(scid = %scid, "Control worker started");

    while let Some(command) = commands.recv().await {
        let input = match command {
            WorkerCommand::Input(input) => input,
            WorkerCommand::Stop => break,
        };

        let event = match codec.encode(input) {
            Ok(Some(bytes)) => WorkerEvent::Write(bytes),
            Ok(None) => continue,
            Err(e) => {
                warn!(scid = %scid, error = %e, "Control input rejected");
                WorkerEvent::Error(e.to_string())
            }
        };

        if events.send(event).await.is_err() {
            break;
        }
    }

    let _ = events.send(WorkerEvent::Exit).await;
    debug!(scid = %scid, "Control worker stopped");
}

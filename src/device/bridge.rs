//! Device management collaborator
//!
//! The relay never talks to the device directly. Pushing the agent, managing
//! reverse tunnels, launching the agent process and querying the battery all
//! go through a [`DeviceBridge`].

use std::future::Future;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::DeviceError;

/// Device-side operations needed by a session
///
/// Implementations must be cheap to share; the session manager holds one in
/// an `Arc` and calls it from many tasks.
pub trait DeviceBridge: Send + Sync + 'static {
    /// Push the agent jar to `device_path` on the device
    fn push_server(
        &self,
        device: &str,
        device_path: &str,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Check whether a reverse tunnel with this name is registered
    fn reverse_tunnel_exists(
        &self,
        device: &str,
        name: &str,
    ) -> impl Future<Output = Result<bool, DeviceError>> + Send;

    /// Run a device tool command (e.g. `-s <serial> reverse ...`)
    fn execute_command(
        &self,
        args: Vec<String>,
        label: &str,
    ) -> impl Future<Output = Result<String, DeviceError>> + Send;

    /// Start a shell command on the device and keep it running
    fn shell(
        &self,
        device: &str,
        command: &str,
    ) -> impl Future<Output = Result<AgentProcess, DeviceError>> + Send;

    /// Current battery level in percent
    fn battery_level(&self, device: &str) -> impl Future<Output = Result<u8, DeviceError>> + Send;
}

/// Output of a running agent process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of stdout
    Output(Bytes),
    /// The process or its stream failed
    Error(String),
    /// The process exited
    End,
}

/// Handle to the agent process, owned by the session task
#[derive(Debug)]
pub struct AgentProcess {
    events: mpsc::Receiver<ProcessEvent>,
    stop: Option<oneshot::Sender<()>>,
}

/// Bridge-side end of an [`AgentProcess`]
#[derive(Debug)]
pub struct ProcessController {
    /// Report output and termination
    pub events: mpsc::Sender<ProcessEvent>,
    /// Resolves when the session asks the process to end
    pub stop: oneshot::Receiver<()>,
}

impl AgentProcess {
    /// Create a connected process handle and controller
    pub fn channel(capacity: usize) -> (ProcessController, AgentProcess) {
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (stop_tx, stop_rx) = oneshot::channel();

        (
            ProcessController {
                events: events_tx,
                stop: stop_rx,
            },
            AgentProcess {
                events: events_rx,
                stop: Some(stop_tx),
            },
        )
    }

    /// Wait for the next event; a dropped controller reads as `End`
    pub async fn next_event(&mut self) -> ProcessEvent {
        self.events.recv().await.unwrap_or(ProcessEvent::End)
    }

    /// Ask the process to end. Idempotent.
    pub fn end(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_process_events_and_end() {
        let (controller, mut process) = AgentProcess::channel(4);

        controller
            .events
            .send(ProcessEvent::Output(Bytes::from_static(b"INFO: Device: x")))
            .await
            .unwrap();
        assert_eq!(
            process.next_event().await,
            ProcessEvent::Output(Bytes::from_static(b"INFO: Device: x"))
        );

        process.end();
        process.end();
        assert!(process.stop.is_none());
        assert!(controller.stop.await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_controller_reads_as_end() {
        let (controller, mut process) = AgentProcess::channel(1);
        drop(controller);
        assert_eq!(process.next_event().await, ProcessEvent::End);
    }
}

//! Session manager
//!
//! Entry point of the relay: starts sessions (agent deployment, reverse
//! tunnel, device listener, agent launch), stops them and routes client
//! control input to them.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::config::RelayConfig;
use super::listener::DeviceListener;
use super::session_task::{SessionParts, SessionTask};
use crate::client::ClientSink;
use crate::control::{ControlCodec, PassthroughCodec};
use crate::device::{AgentProcess, DeviceBridge, ReverseTunnel};
use crate::error::{Result, SessionError};
use crate::protocol::constants::{tunnel_name, STATUS_STREAMING_STOPPED};
use crate::protocol::{ClientMessage, Outbound};
use crate::registry::{SessionCommand, SessionEntry, SessionInfo, SessionRegistry};
use crate::session::SessionOptions;

/// Builds a control codec for each new control stream
pub type CodecFactory = Arc<dyn Fn() -> Box<dyn ControlCodec> + Send + Sync>;

/// Starts, stops and addresses relay sessions
pub struct SessionManager<D: DeviceBridge> {
    config: RelayConfig,
    bridge: Arc<D>,
    registry: Arc<SessionRegistry>,
    codec_factory: CodecFactory,
}

impl<D: DeviceBridge> SessionManager<D> {
    /// Create a manager with its own registry
    pub fn new(config: RelayConfig, bridge: D) -> Self {
        Self::with_registry(config, bridge, Arc::new(SessionRegistry::new()))
    }

    /// Create a manager sharing an existing registry
    pub fn with_registry(config: RelayConfig, bridge: D, registry: Arc<SessionRegistry>) -> Self {
        Self {
            config,
            bridge: Arc::new(bridge),
            registry,
            codec_factory: Arc::new(|| Box::new(PassthroughCodec) as Box<dyn ControlCodec>),
        }
    }

    /// Use a custom control codec for new sessions
    pub fn control_codec<F, C>(mut self, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: ControlCodec,
    {
        self.codec_factory = Arc::new(move || Box::new(factory()) as Box<dyn ControlCodec>);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn bridge(&self) -> &Arc<D> {
        &self.bridge
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Channel for one client, sized by `client_channel_capacity`
    pub fn client_channel(&self) -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        mpsc::channel(self.config.client_channel_capacity)
    }

    /// Start a session
    ///
    /// Pushes the agent, binds the device listener on `port` (0 picks one),
    /// (re)creates the reverse tunnel and launches the agent. On failure
    /// everything acquired so far is released before the error is returned.
    pub async fn start(
        &self,
        device_id: &str,
        scid: &str,
        port: u16,
        options: SessionOptions,
        client: mpsc::Sender<Outbound>,
    ) -> Result<SessionInfo> {
        if options.streams.is_empty() {
            return Err(SessionError::NoStreamsRequested.into());
        }

        let (command_tx, command_rx) = mpsc::channel(self.config.command_channel_capacity);
        self.registry
            .insert(SessionEntry::new(scid, device_id, options.streams, command_tx))
            .await?;

        let mut client = ClientSink::new(scid, client);
        let lock = self
            .registry
            .tunnel_lock(device_id, &tunnel_name(scid))
            .await;
        let mut tunnel = ReverseTunnel::new(device_id, scid, lock);

        let (listener, process) = match self
            .setup(device_id, scid, port, &options, &mut tunnel)
            .await
        {
            Ok(resources) => resources,
            Err(e) => {
                error!(scid = %scid, device = %device_id, error = %e, "Session setup failed");
                self.abort_setup(scid, &mut tunnel, &mut client, &e.to_string())
                    .await;
                return Err(e);
            }
        };

        let port = listener.port();
        let live = self.registry.set_port(scid, port).await;
        let info = SessionInfo {
            scid: scid.to_string(),
            device_id: device_id.to_string(),
            port,
            streams: options.streams,
        };

        let task = SessionTask::new(SessionParts {
            scid: scid.to_string(),
            device_id: device_id.to_string(),
            options,
            config: self.config.clone(),
            bridge: Arc::clone(&self.bridge),
            registry: Arc::clone(&self.registry),
            codec_factory: Arc::clone(&self.codec_factory),
            client,
            listener,
            process,
            tunnel,
            commands: command_rx,
        });
        // A stop during setup is already queued; the task handles it first
        tokio::spawn(task.run());

        if !live {
            info!(scid = %scid, "Session stopped during setup");
            return Err(SessionError::Cancelled(scid.to_string()).into());
        }

        info!(scid = %scid, device = %device_id, port, "Session started");
        Ok(info)
    }

    async fn setup(
        &self,
        device_id: &str,
        scid: &str,
        port: u16,
        options: &SessionOptions,
        tunnel: &mut ReverseTunnel,
    ) -> Result<(DeviceListener, AgentProcess)> {
        self.bridge
            .push_server(device_id, &self.config.server_device_path)
            .await?;
        debug!(scid = %scid, device = %device_id, "Agent pushed");

        let listener = DeviceListener::bind(&self.config, port).await?;
        tunnel.open(self.bridge.as_ref(), listener.port()).await?;

        let command = self.config.agent_command(scid, options);
        debug!(scid = %scid, command = %command, "Launching agent");
        let process = self.bridge.shell(device_id, &command).await?;

        Ok((listener, process))
    }

    async fn abort_setup(
        &self,
        scid: &str,
        tunnel: &mut ReverseTunnel,
        client: &mut ClientSink,
        reason: &str,
    ) {
        self.registry.remove(scid).await;

        if let Err(e) = tunnel.close(self.bridge.as_ref(), "Remove tunnel").await {
            error!(scid = %scid, error = %e, "Failed to remove tunnel after setup failure");
        }

        client
            .send_message(&ClientMessage::session_error(
                scid,
                format!("Setup failed: {}", reason),
            ));
        client.send_message(&ClientMessage::status(STATUS_STREAMING_STOPPED));
    }

    /// Stop a session and wait for its teardown
    ///
    /// Returns false if no such session is live.
    pub async fn stop(&self, scid: &str) -> bool {
        let Some(entry) = self.registry.remove(scid).await else {
            debug!(scid = %scid, "Stop for unknown session");
            return false;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if entry.commands.send(SessionCommand::Stop(ack_tx)).await.is_ok() {
            // Err means the task ended without acknowledging, which is fine
            let _ = ack_rx.await;
        }
        true
    }

    /// Stop every live session
    pub async fn stop_all(&self) {
        for scid in self.registry.session_ids().await {
            self.stop(&scid).await;
        }
    }

    /// Queue client control input for a session's control worker
    pub async fn send_control(&self, scid: &str, input: Bytes) -> Result<()> {
        let commands = self
            .registry
            .commands(scid)
            .await
            .ok_or_else(|| SessionError::NotFound(scid.to_string()))?;

        commands
            .send(SessionCommand::Control(input))
            .await
            .map_err(|_| SessionError::Closed(scid.to_string()))?;
        Ok(())
    }

    pub async fn session(&self, scid: &str) -> Option<SessionInfo> {
        self.registry.get(scid).await
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.registry.session_ids().await
    }

    pub async fn contains(&self, scid: &str) -> bool {
        self.registry.contains(scid).await
    }

    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::device::ProcessController;
    use crate::error::{DeviceError, Error};
    use crate::session::StreamSet;

    /// Records commands; optionally fails the tunnel setup
    #[derive(Default)]
    struct RecordingBridge {
        fail_tunnel: bool,
        tunnels: Mutex<Vec<String>>,
        commands: Mutex<Vec<Vec<String>>>,
        pushed: Mutex<Vec<String>>,
        launched: Mutex<Vec<String>>,
        processes: Mutex<Vec<ProcessController>>,
    }

    impl DeviceBridge for RecordingBridge {
        async fn push_server(
            &self,
            _device: &str,
            device_path: &str,
        ) -> std::result::Result<(), DeviceError> {
            self.pushed.lock().unwrap().push(device_path.to_string());
            Ok(())
        }

        async fn reverse_tunnel_exists(
            &self,
            _device: &str,
            name: &str,
        ) -> std::result::Result<bool, DeviceError> {
            Ok(self.tunnels.lock().unwrap().iter().any(|t| t == name))
        }

        async fn execute_command(
            &self,
            args: Vec<String>,
            label: &str,
        ) -> std::result::Result<String, DeviceError> {
            if self.fail_tunnel && label == "Setup reverse tunnel" {
                return Err(DeviceError::CommandFailed {
                    label: label.to_string(),
                    message: "device offline".into(),
                });
            }
            {
                let mut tunnels = self.tunnels.lock().unwrap();
                match args.get(3).map(String::as_str) {
                    Some("--remove") => tunnels.retain(|t| Some(t) != args.get(4)),
                    Some(name) => tunnels.push(name.to_string()),
                    None => {}
                }
            }
            self.commands.lock().unwrap().push(args);
            Ok(String::new())
        }

        async fn shell(
            &self,
            _device: &str,
            command: &str,
        ) -> std::result::Result<AgentProcess, DeviceError> {
            self.launched.lock().unwrap().push(command.to_string());
            let (controller, process) = AgentProcess::channel(8);
            self.processes.lock().unwrap().push(controller);
            Ok(process)
        }

        async fn battery_level(&self, _device: &str) -> std::result::Result<u8, DeviceError> {
            Ok(50)
        }
    }

    fn video_only() -> SessionOptions {
        SessionOptions::new(StreamSet::new(true, false, false))
    }

    #[tokio::test]
    async fn test_start_requires_streams() {
        let manager = SessionManager::new(RelayConfig::default(), RecordingBridge::default());
        let (tx, _rx) = mpsc::channel(8);

        let result = manager
            .start("emulator-5554", "0000abcd", 0, SessionOptions::default(), tx)
            .await;
        assert!(matches!(
            result,
            Err(Error::Session(SessionError::NoStreamsRequested))
        ));
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let manager = SessionManager::new(RelayConfig::default(), RecordingBridge::default());
        let (tx, mut rx) = mpsc::channel(8);

        let info = manager
            .start("emulator-5554", "0000abcd", 0, video_only(), tx)
            .await
            .unwrap();
        assert_ne!(info.port, 0);
        assert!(manager.contains("0000abcd").await);
        assert_eq!(manager.session("0000abcd").await.unwrap().port, info.port);
        assert_eq!(
            manager.bridge().tunnels.lock().unwrap().clone(),
            vec!["localabstract:scrcpy_0000abcd".to_string()]
        );

        assert!(manager.stop("0000abcd").await);
        assert!(!manager.contains("0000abcd").await);
        assert!(manager.bridge().tunnels.lock().unwrap().is_empty());
        assert_eq!(
            rx.recv().await.unwrap().as_message(),
            Some(ClientMessage::status(STATUS_STREAMING_STOPPED))
        );

        // Absent session
        assert!(!manager.stop("0000abcd").await);
    }

    #[tokio::test]
    async fn test_duplicate_session_rejected() {
        let manager = SessionManager::new(RelayConfig::default(), RecordingBridge::default());
        let (tx, _rx) = mpsc::channel(8);

        manager
            .start("emulator-5554", "0000abcd", 0, video_only(), tx.clone())
            .await
            .unwrap();
        let result = manager
            .start("emulator-5554", "0000abcd", 0, video_only(), tx)
            .await;
        assert!(matches!(
            result,
            Err(Error::Session(SessionError::AlreadyExists(_)))
        ));

        manager.stop_all().await;
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_tunnel_failure_leaves_nothing_behind() {
        let bridge = RecordingBridge {
            fail_tunnel: true,
            ..Default::default()
        };
        let manager = SessionManager::new(RelayConfig::default(), bridge);
        let (tx, mut rx) = mpsc::channel(8);

        let result = manager
            .start("emulator-5554", "0000abcd", 0, video_only(), tx)
            .await;
        assert!(matches!(result, Err(Error::Device(_))));
        assert!(!manager.contains("0000abcd").await);
        assert!(manager.bridge().processes.lock().unwrap().is_empty());

        let Some(ClientMessage::Error { message, scid }) = rx.recv().await.unwrap().as_message()
        else {
            panic!("expected error message");
        };
        assert!(message.starts_with("Setup failed: "));
        assert_eq!(scid.as_deref(), Some("0000abcd"));
        assert_eq!(
            rx.recv().await.unwrap().as_message(),
            Some(ClientMessage::status(STATUS_STREAMING_STOPPED))
        );
    }

    #[tokio::test]
    async fn test_stale_tunnel_is_replaced() {
        let bridge = RecordingBridge::default();
        bridge
            .tunnels
            .lock()
            .unwrap()
            .push("localabstract:scrcpy_0000abcd".into());
        let manager = SessionManager::new(RelayConfig::default(), bridge);
        let (tx, _rx) = mpsc::channel(8);

        manager
            .start("emulator-5554", "0000abcd", 0, video_only(), tx)
            .await
            .unwrap();

        let commands = manager.bridge().commands.lock().unwrap().clone();
        assert_eq!(commands[0][3], "--remove");
        assert_eq!(commands[1][3], "localabstract:scrcpy_0000abcd");
        assert!(commands[1][4].starts_with("tcp:"));

        manager.stop("0000abcd").await;
    }

    #[tokio::test]
    async fn test_send_control_unknown_session() {
        let manager = SessionManager::new(RelayConfig::default(), RecordingBridge::default());
        let result = manager
            .send_control("ffffffff", Bytes::from_static(&[1]))
            .await;
        assert!(matches!(result, Err(Error::Session(SessionError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_process_end_tears_down() {
        let manager = SessionManager::new(RelayConfig::default(), RecordingBridge::default());
        let (tx, mut rx) = mpsc::channel(8);

        manager
            .start("emulator-5554", "0000abcd", 0, video_only(), tx)
            .await
            .unwrap();

        let controller = manager.bridge().processes.lock().unwrap().pop().unwrap();
        controller
            .events
            .send(crate::device::ProcessEvent::End)
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap().as_message(),
            Some(ClientMessage::status(STATUS_STREAMING_STOPPED))
        );
        assert!(!manager.contains("0000abcd").await);
    }

    #[tokio::test]
    async fn test_agent_pushed_and_launched_from_same_path() {
        let config = RelayConfig::default().server_device_path("/data/local/tmp/agent.jar");
        let manager = SessionManager::new(config, RecordingBridge::default());
        let (tx, _rx) = mpsc::channel(8);

        manager
            .start("emulator-5554", "0000abcd", 0, video_only(), tx)
            .await
            .unwrap();

        assert_eq!(
            manager.bridge().pushed.lock().unwrap().clone(),
            vec!["/data/local/tmp/agent.jar".to_string()]
        );
        let launched = manager.bridge().launched.lock().unwrap().clone();
        assert_eq!(launched.len(), 1);
        assert!(launched[0].starts_with("CLASSPATH=/data/local/tmp/agent.jar "));

        manager.stop("0000abcd").await;
    }

    #[tokio::test]
    async fn test_stop_with_stalled_client() {
        let config = RelayConfig::default().client_channel_capacity(1);
        let manager = SessionManager::new(config, RecordingBridge::default());
        let (tx, _rx) = manager.client_channel();

        // Fill the only slot; nothing drains the receiver
        tx.try_send(Outbound::json(&ClientMessage::status("queued")).unwrap())
            .unwrap();

        manager
            .start("emulator-5554", "0000abcd", 0, video_only(), tx)
            .await
            .unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(3), manager.stop("0000abcd")).await;
        assert_eq!(stopped.ok(), Some(true));
        assert!(!manager.contains("0000abcd").await);
        assert!(manager.bridge().tunnels.lock().unwrap().is_empty());

        let mut controller = manager.bridge().processes.lock().unwrap().pop().unwrap();
        assert!(controller.stop.try_recv().is_ok());
    }
}

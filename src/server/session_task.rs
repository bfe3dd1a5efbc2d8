//! Session task
//!
//! One task per session owns the device listener, the demux, the agent
//! process, the control bridge and the battery timer. Other tasks reach it
//! only through [`SessionCommand`]s, so once the registry entry is gone
//! nothing else can touch session state.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::listener::{spawn_reader, ConnEvent, DeviceListener};
use super::manager::CodecFactory;
use crate::client::ClientSink;
use crate::control::{ControlBridge, ControlWorker, WorkerEvent};
use crate::device::{AgentProcess, DeviceBridge, ProcessEvent, ReverseTunnel};
use crate::error::DeviceError;
use crate::protocol::constants::STATUS_STREAMING_STOPPED;
use crate::protocol::ClientMessage;
use crate::registry::{SessionCommand, SessionRegistry};
use crate::server::config::RelayConfig;
use crate::session::{ConnId, DemuxEvent, SessionDemux, SessionOptions};

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StopReason {
    Requested,
    ListenerError(String),
    ProcessError(String),
    ProcessEnded,
    ConnectionsClosed,
    Abandoned,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => f.write_str("stop requested"),
            StopReason::ListenerError(e) => write!(f, "listener error: {}", e),
            StopReason::ProcessError(e) => write!(f, "agent process error: {}", e),
            StopReason::ProcessEnded => f.write_str("agent process ended"),
            StopReason::ConnectionsClosed => f.write_str("all device connections closed"),
            StopReason::Abandoned => f.write_str("command channel closed"),
        }
    }
}

/// Everything a session task is built from
pub(crate) struct SessionParts<D> {
    pub scid: String,
    pub device_id: String,
    pub options: SessionOptions,
    pub config: RelayConfig,
    pub bridge: Arc<D>,
    pub registry: Arc<SessionRegistry>,
    pub codec_factory: CodecFactory,
    pub client: ClientSink,
    pub listener: DeviceListener,
    pub process: AgentProcess,
    pub tunnel: ReverseTunnel,
    pub commands: mpsc::Receiver<SessionCommand>,
}

pub(crate) struct SessionTask<D> {
    scid: String,
    device_id: String,
    options: SessionOptions,
    config: RelayConfig,
    bridge: Arc<D>,
    registry: Arc<SessionRegistry>,
    codec_factory: CodecFactory,
    client: ClientSink,
    listener: DeviceListener,
    process: AgentProcess,
    tunnel: ReverseTunnel,
    commands: mpsc::Receiver<SessionCommand>,
    demux: SessionDemux,
    conn_tx: mpsc::Sender<ConnEvent>,
    conn_rx: mpsc::Receiver<ConnEvent>,
    readers: HashMap<ConnId, JoinHandle<()>>,
    writers: HashMap<ConnId, OwnedWriteHalf>,
    control: ControlBridge<OwnedWriteHalf>,
    battery: Option<Interval>,
    battery_queries: JoinSet<Result<u8, DeviceError>>,
    stop_waiters: Vec<oneshot::Sender<()>>,
}

impl<D: DeviceBridge> SessionTask<D> {
    pub(crate) fn new(parts: SessionParts<D>) -> Self {
        let demux = SessionDemux::with_limits(
            parts.scid.clone(),
            parts.options.streams,
            parts.options.decoder,
            parts.config.demux_limits(),
        );
        let (conn_tx, conn_rx) = mpsc::channel(parts.config.command_channel_capacity);

        Self {
            control: ControlBridge::new(parts.scid.clone()),
            scid: parts.scid,
            device_id: parts.device_id,
            options: parts.options,
            config: parts.config,
            bridge: parts.bridge,
            registry: parts.registry,
            codec_factory: parts.codec_factory,
            client: parts.client,
            listener: parts.listener,
            process: parts.process,
            tunnel: parts.tunnel,
            commands: parts.commands,
            demux,
            conn_tx,
            conn_rx,
            readers: HashMap::new(),
            writers: HashMap::new(),
            battery: None,
            battery_queries: JoinSet::new(),
            stop_waiters: Vec::new(),
        }
    }

    /// Run until the session ends, then tear everything down
    pub(crate) async fn run(mut self) {
        info!(
            scid = %self.scid,
            device = %self.device_id,
            port = self.listener.port(),
            "Session task started"
        );

        let reason = loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(SessionCommand::Control(input)) => self.on_control_input(input),
                    Some(SessionCommand::Stop(ack)) => {
                        self.stop_waiters.push(ack);
                        break StopReason::Requested;
                    }
                    None => break StopReason::Abandoned,
                },

                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        if let Some(reason) = self.on_accept(socket, peer).await {
                            break reason;
                        }
                    }
                    Err(e) => break StopReason::ListenerError(e.to_string()),
                },

                Some(event) = self.conn_rx.recv() => {
                    if let Some(reason) = self.on_connection_event(event).await {
                        break reason;
                    }
                }

                event = self.process.next_event() => match event {
                    ProcessEvent::Output(data) => self.on_process_output(&data),
                    ProcessEvent::Error(e) => break StopReason::ProcessError(e),
                    ProcessEvent::End => break StopReason::ProcessEnded,
                },

                event = self.control.next_event() => self.on_worker_event(event).await,

                _ = next_tick(&mut self.battery) => self.query_battery(),

                Some(result) = self.battery_queries.join_next(),
                    if !self.battery_queries.is_empty() =>
                {
                    self.on_battery_result(result);
                }
            }
        };

        self.teardown(reason).await;
    }

    async fn on_accept(&mut self, socket: TcpStream, peer: SocketAddr) -> Option<StopReason> {
        let Some(id) = self.demux.accept() else {
            debug!(scid = %self.scid, peer = %peer, "Closing refused connection");
            return None;
        };

        if let Err(e) = self.listener.configure_socket(&socket) {
            warn!(scid = %self.scid, conn = id, error = %e, "Failed to configure socket");
        }
        info!(scid = %self.scid, conn = id, peer = %peer, "Device connection accepted");

        let (read_half, write_half) = socket.into_split();
        self.writers.insert(id, write_half);
        self.readers.insert(
            id,
            spawn_reader(id, read_half, self.config.read_chunk_size, self.conn_tx.clone()),
        );

        // A new arrival can complete control-by-elimination
        let events = self.demux.feed(id, &[]);
        self.apply(events).await
    }

    async fn on_connection_event(&mut self, event: ConnEvent) -> Option<StopReason> {
        match event {
            ConnEvent::Data(id, data) => {
                let events = self.demux.feed(id, &data);
                self.apply(events).await
            }
            ConnEvent::Closed { id, error } => {
                if let Some(e) = error {
                    warn!(scid = %self.scid, conn = id, error = %e, "Device connection failed");
                }
                self.close_connection(id)
            }
        }
    }

    async fn apply(&mut self, events: Vec<DemuxEvent>) -> Option<StopReason> {
        let mut stop = None;

        for event in events {
            match event {
                DemuxEvent::Message(message) => {
                    self.client.send_message(&message);
                }
                DemuxEvent::Frame(frame) => {
                    self.client.send_frame(frame);
                }
                DemuxEvent::Destroy(id) => {
                    if let Some(reason) = self.close_connection(id) {
                        stop = Some(reason);
                    }
                }
                DemuxEvent::ControlAssigned(id) => self.attach_control(id),
                DemuxEvent::StreamingStarted => self.on_streaming_started().await,
            }
        }

        stop
    }

    fn close_connection(&mut self, id: ConnId) -> Option<StopReason> {
        if let Some(reader) = self.readers.remove(&id) {
            reader.abort();
        }
        self.writers.remove(&id);
        self.control.detach(id);

        if self.demux.remove(id) {
            Some(StopReason::ConnectionsClosed)
        } else {
            None
        }
    }

    fn attach_control(&mut self, id: ConnId) {
        let Some(writer) = self.writers.remove(&id) else {
            warn!(scid = %self.scid, conn = id, "Control connection already closed");
            return;
        };

        let worker = ControlWorker::spawn(
            self.scid.clone(),
            (self.codec_factory)(),
            self.config.worker_channel_capacity,
        );
        self.control.attach(id, writer, worker);
    }

    async fn on_streaming_started(&mut self) {
        if self.options.turn_screen_off && self.options.streams.control {
            if let Err(e) = self.control.turn_screen_off().await {
                error!(scid = %self.scid, error = %e, "Failed to turn screen off");
                self.client
                    .send_message(&ClientMessage::session_error(
                        &self.scid,
                        format!("Fail send initial screen off: {}", e),
                    ));
            }
        }

        // Zero disables battery polling
        let period = self.config.battery_interval;
        if !period.is_zero() {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.battery = Some(interval);
        }

        // The agent is connected; the tunnel is no longer needed
        if let Err(e) = self
            .tunnel
            .close(self.bridge.as_ref(), "Remove tunnel after connect")
            .await
        {
            warn!(
                scid = %self.scid,
                tunnel = %self.tunnel.name(),
                error = %e,
                "Failed to remove tunnel"
            );
        }
    }

    fn on_control_input(&mut self, input: Bytes) {
        if let Err(e) = self.control.forward(input) {
            warn!(scid = %self.scid, error = %e, "Dropping control input");
        }
    }

    async fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Write(data) => match self.control.write(&data).await {
                Ok(()) => self.demux.stats_mut().control_messages += 1,
                Err(e) => {
                    error!(scid = %self.scid, error = %e, "Control write failed");
                    self.client
                        .send_message(&ClientMessage::session_error(
                            &self.scid,
                            format!("Control error: {}", e),
                        ));
                }
            },
            WorkerEvent::Error(e) => warn!(scid = %self.scid, error = %e, "Control worker error"),
            WorkerEvent::Exit => debug!(scid = %self.scid, "Control worker exited"),
        }
    }

    fn on_process_output(&self, data: &Bytes) {
        for line in String::from_utf8_lossy(data).lines() {
            let line = line.trim();
            if !line.is_empty() {
                info!(scid = %self.scid, line = %line, "Agent output");
            }
        }
    }

    fn query_battery(&mut self) {
        let bridge = Arc::clone(&self.bridge);
        let device = self.device_id.clone();
        self.battery_queries
            .spawn(async move { bridge.battery_level(&device).await });
    }

    fn on_battery_result(&mut self, result: Result<Result<u8, DeviceError>, JoinError>) {
        match result {
            Ok(Ok(level)) => {
                debug!(scid = %self.scid, level, "Battery level");
                self.client
                    .send_message(&ClientMessage::BatteryInfo {
                        success: true,
                        battery_level: level,
                    });
            }
            Ok(Err(e)) => warn!(scid = %self.scid, error = %e, "Battery query failed"),
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!(scid = %self.scid, error = %e, "Battery query task failed"),
        }
    }

    async fn teardown(mut self, reason: StopReason) {
        info!(scid = %self.scid, reason = %reason, "Cleaning up session");

        // Stops further lookups; a concurrent stop() may already have done it
        self.registry.remove(&self.scid).await;

        self.battery = None;
        self.battery_queries.abort_all();

        for (_, reader) in self.readers.drain() {
            reader.abort();
        }
        self.writers.clear();

        self.process.end();
        drop(self.listener);
        self.control.shutdown();

        if let Err(e) = self.tunnel.close(self.bridge.as_ref(), "Remove tunnel").await {
            warn!(
                scid = %self.scid,
                tunnel = %self.tunnel.name(),
                error = %e,
                "Failed to remove tunnel"
            );
        }

        self.client.send_message(&ClientMessage::status(STATUS_STREAMING_STOPPED));

        let stats = self.demux.stats();
        info!(
            scid = %self.scid,
            duration_secs = stats.duration().as_secs(),
            bytes = stats.bytes_received,
            bitrate = stats.bitrate(),
            video_frames = stats.video_frames,
            framerate = stats.calculated_framerate(),
            keyframes = stats.keyframes,
            audio_frames = stats.audio_frames,
            device_messages = stats.device_messages,
            control_messages = stats.control_messages,
            violations = stats.protocol_violations,
            client_drops = self.client.dropped(),
            "Session closed"
        );

        for waiter in self.stop_waiters.drain(..) {
            let _ = waiter.send(());
        }
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let SessionCommand::Stop(waiter) = command {
                let _ = waiter.send(());
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

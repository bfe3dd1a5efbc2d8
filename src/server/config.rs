//! Relay configuration

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::buffer::DEFAULT_BASELINE;
use crate::protocol::constants::{DEVICE_NAME_LENGTH, MAX_PACKET_SIZE};
use crate::session::{DemuxLimits, SessionOptions};

/// Default agent jar location on the device
pub const DEFAULT_SERVER_DEVICE_PATH: &str = "/data/local/tmp/scrcpy-server.jar";

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host the per-session device listeners bind to
    pub listen_host: IpAddr,

    /// Agent jar location on the device, used both as the push target and
    /// the launch classpath
    pub server_device_path: String,

    /// Agent version passed on the command line
    pub agent_version: String,

    /// Agent entry point
    pub agent_main_class: String,

    /// Battery polling period once streaming has started (zero disables)
    pub battery_interval: Duration,

    /// Baseline size of per-connection staging buffers
    pub buffer_baseline: usize,

    /// Largest media payload accepted from the device
    pub max_packet_size: usize,

    /// Size of the device name preamble
    pub device_name_length: usize,

    /// Capacity of channels made by `SessionManager::client_channel`; a
    /// client that falls this far behind starts losing items
    pub client_channel_capacity: usize,

    /// Capacity of the session command channel
    pub command_channel_capacity: usize,

    /// Capacity of control worker channels
    pub worker_channel_capacity: usize,

    /// Read size for device connections
    pub read_chunk_size: usize,

    /// Enable TCP_NODELAY on device connections
    pub tcp_nodelay: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            server_device_path: DEFAULT_SERVER_DEVICE_PATH.into(),
            agent_version: "3.1".into(),
            agent_main_class: "com.genymobile.scrcpy.Server".into(),
            battery_interval: Duration::from_secs(60),
            buffer_baseline: DEFAULT_BASELINE,
            max_packet_size: MAX_PACKET_SIZE,
            device_name_length: DEVICE_NAME_LENGTH,
            client_channel_capacity: 256,
            command_channel_capacity: 64,
            worker_channel_capacity: 64,
            read_chunk_size: 64 * 1024, // 64KB
            tcp_nodelay: true,
        }
    }
}

impl RelayConfig {
    /// Set the listener host
    pub fn listen_host(mut self, host: IpAddr) -> Self {
        self.listen_host = host;
        self
    }

    /// Set the agent jar path on the device
    pub fn server_device_path(mut self, path: impl Into<String>) -> Self {
        self.server_device_path = path.into();
        self
    }

    /// Set the agent version string
    pub fn agent_version(mut self, version: impl Into<String>) -> Self {
        self.agent_version = version.into();
        self
    }

    /// Set the battery polling period
    pub fn battery_interval(mut self, interval: Duration) -> Self {
        self.battery_interval = interval;
        self
    }

    /// Set the staging buffer baseline
    pub fn buffer_baseline(mut self, size: usize) -> Self {
        self.buffer_baseline = size.max(1);
        self
    }

    /// Set the largest accepted media payload
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Set the client channel capacity
    pub fn client_channel_capacity(mut self, capacity: usize) -> Self {
        self.client_channel_capacity = capacity.max(1);
        self
    }

    /// Set the device connection read size
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub(crate) fn demux_limits(&self) -> DemuxLimits {
        DemuxLimits {
            buffer_baseline: self.buffer_baseline,
            max_packet_size: self.max_packet_size,
            device_name_length: self.device_name_length,
        }
    }

    /// Shell command launching the agent for one session
    pub fn agent_command(&self, scid: &str, options: &SessionOptions) -> String {
        let mut command = format!(
            "CLASSPATH={} app_process / {} {}",
            self.server_device_path, self.agent_main_class, self.agent_version
        );
        for arg in options.agent_args(scid) {
            command.push(' ');
            command.push_str(&arg);
        }
        command
    }
}

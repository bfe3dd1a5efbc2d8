//! Statistics for relay sessions

use std::time::{Duration, Instant};

/// Per-session relay statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Session id
    pub scid: String,
    /// Session start time
    pub started_at: Instant,
    /// Connections accepted from the device agent
    pub connections_accepted: u64,
    /// Connections refused because every expected stream was already connected
    pub connections_refused: u64,
    /// Total bytes received from the device
    pub bytes_received: u64,
    /// Video frames forwarded (key + delta + legacy)
    pub video_frames: u64,
    /// Video key frames forwarded
    pub keyframes: u64,
    /// Video config packets received
    pub video_configs: u64,
    /// Audio frames forwarded
    pub audio_frames: u64,
    /// Audio frames dropped because no config was cached yet
    pub dropped_audio_frames: u64,
    /// Device messages forwarded from the control stream
    pub device_messages: u64,
    /// Control messages written to the device
    pub control_messages: u64,
    /// Resolution changes announced
    pub resolution_changes: u64,
    /// Connections destroyed for protocol violations
    pub protocol_violations: u64,
}

impl SessionStats {
    pub fn new(scid: impl Into<String>) -> Self {
        Self {
            scid: scid.into(),
            started_at: Instant::now(),
            connections_accepted: 0,
            connections_refused: 0,
            bytes_received: 0,
            video_frames: 0,
            keyframes: 0,
            video_configs: 0,
            audio_frames: 0,
            dropped_audio_frames: 0,
            device_messages: 0,
            control_messages: 0,
            resolution_changes: 0,
            protocol_violations: 0,
        }
    }

    /// Get duration since the session started
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Calculate inbound bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }

    /// Calculate video framerate
    pub fn calculated_framerate(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            self.video_frames as f64 / secs
        } else {
            0.0
        }
    }
}

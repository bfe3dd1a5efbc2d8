//! Device agent and client wire constants

/// Codec id announced on the video stream ("h264")
pub const VIDEO_CODEC_H264: u32 = 0x6832_3634;

/// Codec id announced on the audio stream ("\0aac")
pub const AUDIO_CODEC_AAC: u32 = 0x0061_6163;

/// Fixed size of the device name preamble (NUL padded UTF-8)
pub const DEVICE_NAME_LENGTH: usize = 64;

/// Video metadata: codec id, width, height (all u32 BE)
pub const VIDEO_METADATA_LENGTH: usize = 12;

/// Audio metadata: codec id (u32 BE)
pub const AUDIO_METADATA_LENGTH: usize = 4;

/// Media packet header: pts/flags (u64 BE) + payload length (u32 BE)
pub const PACKET_HEADER_LENGTH: usize = 12;

/// Largest media payload accepted from the device (10 MiB)
pub const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// Control message type: set screen power mode
pub const CONTROL_MSG_TYPE_SET_SCREEN_POWER_MODE: u8 = 10;

/// Screen power mode: off
pub const SCREEN_POWER_MODE_OFF: u8 = 0;

/// Status sent once every requested stream is connected
pub const STATUS_STREAMING_STARTED: &str = "Streaming started";

/// Status sent exactly once when a session is torn down
pub const STATUS_STREAMING_STOPPED: &str = "Streaming stopped by server cleanup";

/// Binary frame type tags sent to the client
pub mod frame_tag {
    /// Raw Annex-B video for decoders without timestamp support
    pub const LEGACY_VIDEO_H264: u8 = 0;
    pub const VIDEO_CONFIG_H264: u8 = 2;
    pub const VIDEO_KEY_FRAME_H264: u8 = 3;
    pub const VIDEO_DELTA_FRAME_H264: u8 = 4;
    pub const AUDIO_CONFIG_AAC: u8 = 5;
    pub const AUDIO_FRAME_AAC: u8 = 6;
}

/// Name of the device-side abstract socket for a session
pub fn tunnel_name(scid: &str) -> String {
    format!("localabstract:scrcpy_{}", scid)
}

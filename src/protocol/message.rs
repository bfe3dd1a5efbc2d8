//! JSON messages sent to the browser client
//!
//! Every message is an object with a `type` discriminator and camelCase
//! fields, e.g. `{"type":"videoInfo","codecId":1748121140,"width":1080,"height":2400}`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Device name from the agent preamble
    DeviceName { name: String },

    /// Video stream identified
    #[serde(rename_all = "camelCase")]
    VideoInfo {
        codec_id: u32,
        width: u32,
        height: u32,
    },

    /// Audio stream identified
    #[serde(rename_all = "camelCase")]
    AudioInfo { codec_id: u32 },

    /// Lifecycle status ("Streaming started", "Streaming stopped by server cleanup")
    Status { message: String },

    /// Error report, tagged with the session id where one applies
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scid: Option<String>,
    },

    /// Coded resolution differs from the last one announced
    ResolutionChange { width: u32, height: u32 },

    /// Periodic battery level
    #[serde(rename_all = "camelCase")]
    BatteryInfo { success: bool, battery_level: u8 },

    /// Bytes received on the control stream, base64 encoded
    DeviceMessage { data: String },
}

impl ClientMessage {
    pub fn status(message: impl Into<String>) -> Self {
        ClientMessage::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ClientMessage::Error {
            message: message.into(),
            scid: None,
        }
    }

    pub fn session_error(scid: &str, message: impl Into<String>) -> Self {
        ClientMessage::Error {
            message: message.into(),
            scid: Some(scid.to_string()),
        }
    }
}

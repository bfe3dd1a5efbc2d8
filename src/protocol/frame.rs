//! Binary frames sent to the browser client
//!
//! ```text
//! video config : [2][profile][compat][level][AVCC ...]
//! key frame    : [3][pts u64 BE][NAL payload ...]
//! delta frame  : [4][pts u64 BE][NAL payload ...]
//! audio config : [5][AudioSpecificConfig ...]
//! audio frame  : [6][pts u64 BE][AAC payload ...]
//! legacy video : [0][Annex-B payload ...]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::frame_tag;

/// An outbound binary frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    VideoConfig {
        profile: u8,
        compatibility: u8,
        level: u8,
        avcc: Bytes,
    },
    KeyFrame {
        pts: u64,
        payload: Bytes,
    },
    DeltaFrame {
        pts: u64,
        payload: Bytes,
    },
    AudioConfig {
        raw: Bytes,
    },
    AudioFrame {
        pts: u64,
        payload: Bytes,
    },
    LegacyVideo {
        payload: Bytes,
    },
}

impl OutboundFrame {
    pub fn tag(&self) -> u8 {
        match self {
            OutboundFrame::VideoConfig { .. } => frame_tag::VIDEO_CONFIG_H264,
            OutboundFrame::KeyFrame { .. } => frame_tag::VIDEO_KEY_FRAME_H264,
            OutboundFrame::DeltaFrame { .. } => frame_tag::VIDEO_DELTA_FRAME_H264,
            OutboundFrame::AudioConfig { .. } => frame_tag::AUDIO_CONFIG_AAC,
            OutboundFrame::AudioFrame { .. } => frame_tag::AUDIO_FRAME_AAC,
            OutboundFrame::LegacyVideo { .. } => frame_tag::LEGACY_VIDEO_H264,
        }
    }

    /// Payload bytes carried by the frame (excluding tag and header fields)
    pub fn payload_len(&self) -> usize {
        match self {
            OutboundFrame::VideoConfig { avcc, .. } => avcc.len(),
            OutboundFrame::KeyFrame { payload, .. }
            | OutboundFrame::DeltaFrame { payload, .. }
            | OutboundFrame::AudioFrame { payload, .. }
            | OutboundFrame::LegacyVideo { payload } => payload.len(),
            OutboundFrame::AudioConfig { raw } => raw.len(),
        }
    }

    /// Serialize to the client wire format
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + 8 + self.payload_len());
        buf.put_u8(self.tag());

        match self {
            OutboundFrame::VideoConfig {
                profile,
                compatibility,
                level,
                avcc,
            } => {
                buf.put_u8(*profile);
                buf.put_u8(*compatibility);
                buf.put_u8(*level);
                buf.put_slice(avcc);
            }
            OutboundFrame::KeyFrame { pts, payload }
            | OutboundFrame::DeltaFrame { pts, payload }
            | OutboundFrame::AudioFrame { pts, payload } => {
                buf.put_u64(*pts);
                buf.put_slice(payload);
            }
            OutboundFrame::AudioConfig { raw } => buf.put_slice(raw),
            OutboundFrame::LegacyVideo { payload } => buf.put_slice(payload),
        }

        buf.freeze()
    }
}

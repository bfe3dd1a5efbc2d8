//! Packet reframer
//!
//! Turns device media packets into client frames. Framing is incremental: a
//! packet is only consumed once its header and full payload are buffered,
//! otherwise the buffer is left untouched.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use tracing::{debug, info, warn};

use super::demux::DemuxEvent;
use super::options::DecoderKind;
use crate::buffer::DynamicBuffer;
use crate::error::Result;
use crate::media::aac::AudioSpecificConfig;
use crate::media::h264::{find_nal_unit, parse_sps, AvcConfig, NaluType, SpsInfo};
use crate::protocol::constants::PACKET_HEADER_LENGTH;
use crate::protocol::{ClientMessage, OutboundFrame, PacketHeader};
use crate::stats::SessionStats;

/// Result of trying to take one packet off a buffer
#[derive(Debug)]
pub enum PacketRead {
    /// A complete packet was consumed
    Packet { header: PacketHeader, payload: Bytes },
    /// Header or payload not fully buffered yet
    Incomplete,
    /// Announced payload exceeds the limit; nothing consumed
    Oversized(u32),
}

/// Take the next complete packet off the front of `buffer`
pub fn next_packet(buffer: &mut DynamicBuffer, max_packet_size: usize) -> PacketRead {
    let header = match PacketHeader::parse(buffer.as_slice()) {
        Some(header) => header,
        None => return PacketRead::Incomplete,
    };

    if header.payload_len as usize > max_packet_size {
        return PacketRead::Oversized(header.payload_len);
    }

    let total = header.total_len();
    if buffer.len() < total {
        return PacketRead::Incomplete;
    }

    let payload = Bytes::copy_from_slice(&buffer.as_slice()[PACKET_HEADER_LENGTH..total]);
    buffer.consume(total);

    PacketRead::Packet { header, payload }
}

/// Drain everything buffered on the control stream as one device message
pub fn drain_control(buffer: &mut DynamicBuffer) -> Option<ClientMessage> {
    if buffer.is_empty() {
        return None;
    }
    let data = STANDARD.encode(buffer.as_slice());
    buffer.clear();
    Some(ClientMessage::DeviceMessage { data })
}

/// Codec state shared by the media connections of one session
#[derive(Debug, Clone)]
pub struct MediaState {
    pub decoder: DecoderKind,
    /// Last announced width (seeded from video metadata)
    pub width: u32,
    /// Last announced height (seeded from video metadata)
    pub height: u32,
    /// Cached audio config; audio frames are dropped until it is set
    pub audio_config: Option<AudioSpecificConfig>,
}

impl MediaState {
    pub fn new(decoder: DecoderKind) -> Self {
        Self {
            decoder,
            width: 0,
            height: 0,
            audio_config: None,
        }
    }

    /// Handle one video packet
    pub fn video_packet(
        &mut self,
        scid: &str,
        header: PacketHeader,
        payload: Bytes,
        stats: &mut SessionStats,
        out: &mut Vec<DemuxEvent>,
    ) {
        if header.config {
            stats.video_configs += 1;
        }

        match self.decoder {
            DecoderKind::WebCodecs if header.config => {
                self.video_config(scid, &payload, stats, out)
            }
            DecoderKind::WebCodecs => {
                stats.video_frames += 1;
                let frame = if header.key_frame {
                    stats.keyframes += 1;
                    OutboundFrame::KeyFrame {
                        pts: header.pts,
                        payload,
                    }
                } else {
                    OutboundFrame::DeltaFrame {
                        pts: header.pts,
                        payload,
                    }
                };
                out.push(DemuxEvent::Frame(frame));
            }
            DecoderKind::Legacy => {
                if header.config {
                    if let Some(info) = find_nal_unit(&payload, NaluType::Sps).and_then(parse_sps) {
                        self.update_resolution(scid, &info, stats, out);
                    }
                } else {
                    stats.video_frames += 1;
                    if header.key_frame {
                        stats.keyframes += 1;
                    }
                }
                out.push(DemuxEvent::Frame(OutboundFrame::LegacyVideo { payload }));
            }
        }
    }

    fn video_config(
        &mut self,
        scid: &str,
        payload: &[u8],
        stats: &mut SessionStats,
        out: &mut Vec<DemuxEvent>,
    ) {
        let (sps, pps) = match (
            find_nal_unit(payload, NaluType::Sps),
            find_nal_unit(payload, NaluType::Pps),
        ) {
            (Some(sps), Some(pps)) => (sps, pps),
            (sps, pps) => {
                warn!(
                    scid = %scid,
                    has_sps = sps.is_some(),
                    has_pps = pps.is_some(),
                    len = payload.len(),
                    "Config packet without SPS/PPS"
                );
                return;
            }
        };

        let avcc = AvcConfig::from_parameter_sets(sps, pps);
        let info = parse_sps(sps);

        match (&avcc, &info) {
            (Ok(avcc), Some(info)) => {
                debug!(
                    scid = %scid,
                    profile = avcc.profile_name(),
                    level = %avcc.level_string(),
                    avcc_len = avcc.raw.len(),
                    "Video config"
                );
                out.push(DemuxEvent::Frame(OutboundFrame::VideoConfig {
                    profile: info.profile_idc,
                    compatibility: info.profile_compatibility,
                    level: info.level_idc,
                    avcc: avcc.raw.clone(),
                }));
            }
            (Err(e), _) => {
                warn!(scid = %scid, error = %e, "Failed to build AVCC record");
            }
            (Ok(_), None) => {
                warn!(scid = %scid, "SPS unparseable, skipping video config");
            }
        }

        if let Some(info) = info {
            self.update_resolution(scid, &info, stats, out);
        }
    }

    fn update_resolution(
        &mut self,
        scid: &str,
        info: &SpsInfo,
        stats: &mut SessionStats,
        out: &mut Vec<DemuxEvent>,
    ) {
        if info.width == self.width && info.height == self.height {
            return;
        }

        info!(
            scid = %scid,
            width = info.width,
            height = info.height,
            "Resolution change"
        );
        self.width = info.width;
        self.height = info.height;
        stats.resolution_changes += 1;
        out.push(DemuxEvent::Message(ClientMessage::ResolutionChange {
            width: info.width,
            height: info.height,
        }));
    }

    /// Handle one audio packet
    ///
    /// An unparseable config is an error; the caller destroys the connection.
    pub fn audio_packet(
        &mut self,
        scid: &str,
        header: PacketHeader,
        payload: Bytes,
        stats: &mut SessionStats,
        out: &mut Vec<DemuxEvent>,
    ) -> Result<()> {
        if header.config {
            let config = AudioSpecificConfig::parse(payload)?;
            debug!(
                scid = %scid,
                profile = config.profile.name(),
                sample_rate = config.sampling_frequency,
                channels = config.channels(),
                "Audio config"
            );
            out.push(DemuxEvent::Frame(OutboundFrame::AudioConfig {
                raw: config.raw.clone(),
            }));
            self.audio_config = Some(config);
        } else if self.audio_config.is_some() {
            stats.audio_frames += 1;
            out.push(DemuxEvent::Frame(OutboundFrame::AudioFrame {
                pts: header.pts,
                payload,
            }));
        } else {
            stats.dropped_audio_frames += 1;
        }

        Ok(())
    }
}

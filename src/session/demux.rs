//! Session demultiplexer
//!
//! The device agent opens one plain TCP connection per requested stream and
//! never says which is which. [`SessionDemux`] tracks every connection of a
//! session and works out the roles from the bytes themselves:
//!
//! 1. The first accepted connection carries a 64-byte device name preamble.
//!    Every other connection skips the preamble state once it is consumed.
//! 2. A connection whose leading 4 bytes are the H.264 codec id (and whose
//!    12-byte video metadata is fully buffered) becomes the video stream; the
//!    AAC codec id makes it the audio stream.
//! 3. Control sends no metadata. Once every connection has arrived and every
//!    media role is classified, the single remaining connection is control.
//!
//! The demux is synchronous and owns no I/O. [`SessionDemux::feed`] returns
//! the events the session task must act on, in order.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, error, info, warn};

use super::connection::{ConnId, Connection, ConnectionState};
use super::options::{DecoderKind, StreamRole, StreamSet};
use super::reframe::{drain_control, next_packet, MediaState, PacketRead};
use crate::protocol::constants::{
    AUDIO_CODEC_AAC, AUDIO_METADATA_LENGTH, DEVICE_NAME_LENGTH, MAX_PACKET_SIZE,
    STATUS_STREAMING_STARTED, VIDEO_CODEC_H264, VIDEO_METADATA_LENGTH,
};
use crate::protocol::{ClientMessage, OutboundFrame};
use crate::stats::SessionStats;

/// Something the session task must do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxEvent {
    /// Send a JSON message to the client
    Message(ClientMessage),
    /// Send a binary frame to the client
    Frame(OutboundFrame),
    /// Close the connection (protocol violation)
    Destroy(ConnId),
    /// Connection classified as control; start the control worker
    ControlAssigned(ConnId),
    /// Every requested stream is connected (fires once)
    StreamingStarted,
}

/// Limits applied to device connections
#[derive(Debug, Clone, Copy)]
pub struct DemuxLimits {
    /// Baseline staging buffer size per connection
    pub buffer_baseline: usize,
    /// Largest accepted media payload
    pub max_packet_size: usize,
    /// Size of the device name preamble
    pub device_name_length: usize,
}

impl Default for DemuxLimits {
    fn default() -> Self {
        Self {
            buffer_baseline: crate::buffer::DEFAULT_BASELINE,
            max_packet_size: MAX_PACKET_SIZE,
            device_name_length: DEVICE_NAME_LENGTH,
        }
    }
}

/// Outcome of examining a connection waiting for metadata
enum Classification {
    Classified,
    Wait,
    Violation,
}

/// Per-session connection classifier and reframer
#[derive(Debug)]
pub struct SessionDemux {
    scid: String,
    expected: StreamSet,
    limits: DemuxLimits,
    connections: BTreeMap<ConnId, Connection>,
    video: Option<ConnId>,
    audio: Option<ConnId>,
    control: Option<ConnId>,
    next_id: ConnId,
    accepted: usize,
    preamble_owner: Option<ConnId>,
    device_name_received: bool,
    streaming_started: bool,
    media: MediaState,
    stats: SessionStats,
}

impl SessionDemux {
    pub fn new(scid: impl Into<String>, expected: StreamSet, decoder: DecoderKind) -> Self {
        Self::with_limits(scid, expected, decoder, DemuxLimits::default())
    }

    pub fn with_limits(
        scid: impl Into<String>,
        expected: StreamSet,
        decoder: DecoderKind,
        limits: DemuxLimits,
    ) -> Self {
        let scid = scid.into();
        Self {
            stats: SessionStats::new(scid.clone()),
            scid,
            expected,
            limits,
            connections: BTreeMap::new(),
            video: None,
            audio: None,
            control: None,
            next_id: 1,
            accepted: 0,
            preamble_owner: None,
            device_name_received: false,
            streaming_started: false,
            media: MediaState::new(decoder),
        }
    }

    /// Register a new device connection
    ///
    /// Returns `None` (refuse the connection) once every expected connection
    /// has already been accepted. The caller should `feed` the new id with no
    /// data so that pending classifications get a chance to run.
    pub fn accept(&mut self) -> Option<ConnId> {
        if self.accepted >= self.expected.len() {
            self.stats.connections_refused += 1;
            warn!(
                scid = %self.scid,
                accepted = self.accepted,
                expected = self.expected.len(),
                "Refusing extra connection"
            );
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.accepted += 1;
        self.stats.connections_accepted += 1;
        if self.preamble_owner.is_none() {
            self.preamble_owner = Some(id);
        }

        self.connections
            .insert(id, Connection::new(id, self.limits.buffer_baseline));
        debug!(
            scid = %self.scid,
            conn = id,
            accepted = self.accepted,
            expected = self.expected.len(),
            "Connection accepted"
        );

        Some(id)
    }

    /// Append bytes received on a connection and process everything complete
    pub fn feed(&mut self, id: ConnId, data: &[u8]) -> Vec<DemuxEvent> {
        let mut events = Vec::new();

        match self.connections.get_mut(&id) {
            Some(conn) if conn.state != ConnectionState::Unknown => {
                conn.buffer.append(data);
                conn.bytes_received += data.len() as u64;
                self.stats.bytes_received += data.len() as u64;
            }
            _ => return events,
        }

        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            self.pump(next, &mut events, &mut queue);
        }

        if let Some(conn) = self.connections.get_mut(&id) {
            conn.buffer.compact_if_idle();
        }

        events
    }

    /// Forget a closed connection
    ///
    /// Returns true once the session has no classified connection left after
    /// every expected connection arrived, i.e. the session should be torn down.
    /// Losing the preamble connection before the device name arrived is also
    /// fatal: no other connection will ever carry it.
    pub fn remove(&mut self, id: ConnId) -> bool {
        if let Some(conn) = self.connections.remove(&id) {
            debug!(
                scid = %self.scid,
                conn = id,
                role = ?conn.role,
                bytes = conn.bytes_received,
                "Connection closed"
            );
        }
        for slot in [&mut self.video, &mut self.audio, &mut self.control] {
            if *slot == Some(id) {
                *slot = None;
            }
        }

        if self.preamble_owner == Some(id) && !self.device_name_received {
            warn!(scid = %self.scid, conn = id, "Connection closed before sending the device name");
            return true;
        }

        self.accepted >= self.expected.len()
            && self.video.is_none()
            && self.audio.is_none()
            && self.control.is_none()
    }

    /// Connection currently classified for `role`
    pub fn connection_for(&self, role: StreamRole) -> Option<ConnId> {
        match role {
            StreamRole::Video => self.video,
            StreamRole::Audio => self.audio,
            StreamRole::Control => self.control,
        }
    }

    pub fn streaming_started(&self) -> bool {
        self.streaming_started
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn expected(&self) -> StreamSet {
        self.expected
    }

    pub fn media(&self) -> &MediaState {
        &self.media
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    /// Drive one connection as far as its buffered bytes allow
    fn pump(&mut self, id: ConnId, events: &mut Vec<DemuxEvent>, queue: &mut VecDeque<ConnId>) {
        loop {
            let state = match self.connections.get(&id) {
                Some(conn) => conn.state,
                None => return,
            };

            let progressed = match state {
                ConnectionState::AwaitingInitial => self.handle_initial(id, events, queue),
                ConnectionState::AwaitingMetadata => self.handle_metadata(id, events, queue),
                ConnectionState::Streaming => self.handle_streaming(id, events),
                ConnectionState::Unknown => false,
            };

            if !progressed {
                return;
            }
        }
    }

    fn handle_initial(
        &mut self,
        id: ConnId,
        events: &mut Vec<DemuxEvent>,
        queue: &mut VecDeque<ConnId>,
    ) -> bool {
        let device_name_received = self.device_name_received;
        let name_len = self.limits.device_name_length;
        let is_owner = self.preamble_owner == Some(id);
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };

        if device_name_received {
            conn.state = ConnectionState::AwaitingMetadata;
            return true;
        }
        if !is_owner || conn.buffer.len() < name_len {
            return false;
        }

        let raw = &conn.buffer.as_slice()[..name_len];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let name = String::from_utf8_lossy(&raw[..end]).into_owned();
        conn.buffer.consume(name_len);
        conn.handled_preamble = true;
        conn.state = ConnectionState::AwaitingMetadata;
        self.device_name_received = true;

        info!(scid = %self.scid, conn = id, device = %name, "Device name received");
        events.push(DemuxEvent::Message(ClientMessage::DeviceName { name }));

        // Connections parked behind the preamble can move on now
        queue.extend(
            self.connections
                .values()
                .filter(|c| c.id != id && c.state == ConnectionState::AwaitingInitial)
                .map(|c| c.id),
        );

        true
    }

    fn handle_metadata(
        &mut self,
        id: ConnId,
        events: &mut Vec<DemuxEvent>,
        queue: &mut VecDeque<ConnId>,
    ) -> bool {
        match self.classify(id, events) {
            Classification::Classified => {
                self.check_streaming_started(events);
                self.try_assign_control(events, queue);
                true
            }
            Classification::Wait => {
                self.try_assign_control(events, queue);
                false
            }
            Classification::Violation => {
                self.reject(id, events);
                false
            }
        }
    }

    /// Match buffered metadata against the media roles still open
    fn classify(&mut self, id: ConnId, events: &mut Vec<DemuxEvent>) -> Classification {
        let video_open = self.expected.video && self.video.is_none();
        let audio_open = self.expected.audio && self.audio.is_none();
        let control_possible = self.expected.control && self.control.is_none();

        let Some(conn) = self.connections.get_mut(&id) else {
            return Classification::Wait;
        };
        let Some(codec_id) = conn.buffer.peek_u32(0) else {
            return Classification::Wait;
        };

        if video_open && codec_id == VIDEO_CODEC_H264 {
            if conn.buffer.len() < VIDEO_METADATA_LENGTH {
                return Classification::Wait;
            }
            let width = conn.buffer.peek_u32(4).unwrap_or(0);
            let height = conn.buffer.peek_u32(8).unwrap_or(0);
            conn.buffer.consume(VIDEO_METADATA_LENGTH);
            conn.classify(StreamRole::Video);
            self.video = Some(id);
            self.media.width = width;
            self.media.height = height;

            info!(scid = %self.scid, conn = id, width, height, "Video stream identified");
            events.push(DemuxEvent::Message(ClientMessage::VideoInfo {
                codec_id,
                width,
                height,
            }));
            return Classification::Classified;
        }

        if audio_open && codec_id == AUDIO_CODEC_AAC {
            conn.buffer.consume(AUDIO_METADATA_LENGTH);
            conn.classify(StreamRole::Audio);
            self.audio = Some(id);

            info!(scid = %self.scid, conn = id, "Audio stream identified");
            events.push(DemuxEvent::Message(ClientMessage::AudioInfo { codec_id }));
            return Classification::Classified;
        }

        if control_possible {
            // Could still be the control stream; elimination decides
            Classification::Wait
        } else {
            error!(
                scid = %self.scid,
                conn = id,
                codec_id = %format!("{:#010x}", codec_id),
                "Metadata matches no open stream"
            );
            Classification::Violation
        }
    }

    /// Classify the last unidentified connection as control
    fn try_assign_control(&mut self, events: &mut Vec<DemuxEvent>, queue: &mut VecDeque<ConnId>) {
        if !self.expected.control || self.control.is_some() || !self.device_name_received {
            return;
        }
        if self.accepted < self.expected.len() {
            return;
        }
        if (self.expected.video && self.video.is_none())
            || (self.expected.audio && self.audio.is_none())
        {
            return;
        }

        let mut unidentified = self.connections.values().filter(|c| c.is_unidentified());
        let (Some(candidate), None) = (unidentified.next(), unidentified.next()) else {
            return;
        };
        let id = candidate.id;

        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        conn.classify(StreamRole::Control);
        self.control = Some(id);
        let pending = !conn.buffer.is_empty();

        info!(scid = %self.scid, conn = id, "Control stream identified by elimination");
        events.push(DemuxEvent::ControlAssigned(id));
        self.check_streaming_started(events);

        if pending {
            queue.push_back(id);
        }
    }

    fn check_streaming_started(&mut self, events: &mut Vec<DemuxEvent>) {
        if self.streaming_started {
            return;
        }
        let ready = (!self.expected.video || self.video.is_some())
            && (!self.expected.audio || self.audio.is_some())
            && (!self.expected.control || self.control.is_some());
        if !ready {
            return;
        }

        self.streaming_started = true;
        info!(scid = %self.scid, "All streams connected");
        events.push(DemuxEvent::Message(ClientMessage::status(
            STATUS_STREAMING_STARTED,
        )));
        events.push(DemuxEvent::StreamingStarted);
    }

    fn handle_streaming(&mut self, id: ConnId, events: &mut Vec<DemuxEvent>) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };

        let role = match conn.role {
            Some(role) => role,
            None => {
                conn.state = ConnectionState::AwaitingMetadata;
                return true;
            }
        };

        if role == StreamRole::Control {
            if let Some(message) = drain_control(&mut conn.buffer) {
                self.stats.device_messages += 1;
                events.push(DemuxEvent::Message(message));
            }
            return false;
        }

        let (header, payload) = match next_packet(&mut conn.buffer, self.limits.max_packet_size) {
            PacketRead::Packet { header, payload } => (header, payload),
            PacketRead::Incomplete => return false,
            PacketRead::Oversized(len) => {
                error!(
                    scid = %self.scid,
                    conn = id,
                    role = %role,
                    len,
                    "Invalid packet size"
                );
                self.reject(id, events);
                return false;
            }
        };

        match role {
            StreamRole::Video => {
                self.media
                    .video_packet(&self.scid, header, payload, &mut self.stats, events);
                true
            }
            StreamRole::Audio => {
                match self
                    .media
                    .audio_packet(&self.scid, header, payload, &mut self.stats, events)
                {
                    Ok(()) => true,
                    Err(e) => {
                        error!(
                            scid = %self.scid,
                            conn = id,
                            error = %e,
                            "Failed to parse audio config"
                        );
                        self.reject(id, events);
                        false
                    }
                }
            }
            StreamRole::Control => false,
        }
    }

    /// Move a connection to the terminal state and ask for it to be closed
    fn reject(&mut self, id: ConnId, events: &mut Vec<DemuxEvent>) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.reject();
            conn.buffer.clear();
            self.stats.protocol_violations += 1;
            events.push(DemuxEvent::Destroy(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::h264::tests::baseline_sps;
    use crate::protocol::PacketHeader;
    use bytes::Bytes;

    const SCID: &str = "0a1b2c3d";

    fn demux_for(video: bool, audio: bool, control: bool) -> SessionDemux {
        SessionDemux::new(
            SCID,
            StreamSet::new(video, audio, control),
            DecoderKind::WebCodecs,
        )
    }

    fn preamble(name: &str) -> Vec<u8> {
        let mut buf = vec![0u8; DEVICE_NAME_LENGTH];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        buf
    }

    fn video_meta(width: u32, height: u32) -> Vec<u8> {
        let mut buf = VIDEO_CODEC_H264.to_be_bytes().to_vec();
        buf.extend_from_slice(&width.to_be_bytes());
        buf.extend_from_slice(&height.to_be_bytes());
        buf
    }

    fn audio_meta() -> Vec<u8> {
        AUDIO_CODEC_AAC.to_be_bytes().to_vec()
    }

    fn packet(config: bool, key_frame: bool, pts: u64, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        PacketHeader {
            config,
            key_frame,
            pts,
            payload_len: payload.len() as u32,
        }
        .encode(&mut buf);
        buf.extend_from_slice(payload);
        buf
    }

    fn count_started(events: &[DemuxEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, DemuxEvent::StreamingStarted))
            .count()
    }

    /// Accept a connection and pump it once, as the session task does
    fn connect(demux: &mut SessionDemux, events: &mut Vec<DemuxEvent>) -> ConnId {
        let id = demux.accept().unwrap();
        events.extend(demux.feed(id, &[]));
        id
    }

    #[test]
    fn test_video_only_session() {
        let mut demux = demux_for(true, false, false);
        let mut events = Vec::new();
        let conn = connect(&mut demux, &mut events);
        assert!(events.is_empty());

        let mut data = preamble("Pixel 7");
        data.extend(video_meta(1080, 2400));
        events.extend(demux.feed(conn, &data));

        assert_eq!(
            events,
            vec![
                DemuxEvent::Message(ClientMessage::DeviceName {
                    name: "Pixel 7".into()
                }),
                DemuxEvent::Message(ClientMessage::VideoInfo {
                    codec_id: VIDEO_CODEC_H264,
                    width: 1080,
                    height: 2400
                }),
                DemuxEvent::Message(ClientMessage::status(STATUS_STREAMING_STARTED)),
                DemuxEvent::StreamingStarted,
            ]
        );
        assert_eq!(demux.connection_for(StreamRole::Video), Some(conn));
        assert_eq!((demux.media().width, demux.media().height), (1080, 2400));
    }

    #[test]
    fn test_preamble_split_across_reads() {
        let mut demux = demux_for(true, false, false);
        let conn = demux.accept().unwrap();
        let data = preamble("Galaxy");

        assert!(demux.feed(conn, &data[..30]).is_empty());
        let events = demux.feed(conn, &data[30..]);
        assert_eq!(
            events,
            vec![DemuxEvent::Message(ClientMessage::DeviceName {
                name: "Galaxy".into()
            })]
        );
    }

    #[test]
    fn test_video_control_session_with_elimination() {
        let mut demux = demux_for(true, false, true);
        let mut events = Vec::new();

        let video = connect(&mut demux, &mut events);
        let control = connect(&mut demux, &mut events);
        assert!(events.is_empty());

        let mut data = preamble("dev");
        data.extend(video_meta(1280, 720));
        events.extend(demux.feed(video, &data));

        assert!(events.contains(&DemuxEvent::ControlAssigned(control)));
        assert_eq!(count_started(&events), 1);
        assert_eq!(demux.connection_for(StreamRole::Control), Some(control));

        // Streaming-started must come after the control assignment
        let assigned = events
            .iter()
            .position(|e| *e == DemuxEvent::ControlAssigned(control))
            .unwrap();
        let started = events
            .iter()
            .position(|e| *e == DemuxEvent::StreamingStarted)
            .unwrap();
        assert!(assigned < started);

        // Control bytes become a device message
        let events = demux.feed(control, &[0x00, 0x01, 0x02]);
        assert_eq!(
            events,
            vec![DemuxEvent::Message(ClientMessage::DeviceMessage {
                data: "AAEC".into()
            })]
        );
    }

    #[test]
    fn test_control_arriving_after_video_classified() {
        let mut demux = demux_for(true, false, true);
        let mut events = Vec::new();

        let video = connect(&mut demux, &mut events);
        let mut data = preamble("dev");
        data.extend(video_meta(1280, 720));
        events.extend(demux.feed(video, &data));
        assert_eq!(count_started(&events), 0);

        let control = connect(&mut demux, &mut events);
        assert!(events.contains(&DemuxEvent::ControlAssigned(control)));
        assert_eq!(count_started(&events), 1);
    }

    #[test]
    fn test_control_with_buffered_bytes_is_pumped_on_assignment() {
        let mut demux = demux_for(true, false, true);
        let mut events = Vec::new();

        let video = connect(&mut demux, &mut events);
        let control = connect(&mut demux, &mut events);

        // Control speaks before video metadata arrives
        events.extend(demux.feed(control, b"ctl"));
        assert!(events.is_empty());

        let mut data = preamble("dev");
        data.extend(video_meta(1280, 720));
        events.extend(demux.feed(video, &data));

        assert!(events.contains(&DemuxEvent::Message(ClientMessage::DeviceMessage {
            data: "Y3Rs".into()
        })));
    }

    #[test]
    fn test_control_only_session() {
        let mut demux = demux_for(false, false, true);
        let mut events = Vec::new();
        let conn = connect(&mut demux, &mut events);

        // Nothing is assigned before the preamble
        assert!(events.is_empty());

        let mut data = preamble("dev");
        data.extend_from_slice(&[0xAB]);
        events.extend(demux.feed(conn, &data));

        assert!(events.contains(&DemuxEvent::ControlAssigned(conn)));
        assert_eq!(count_started(&events), 1);
        assert_eq!(
            events.last(),
            Some(&DemuxEvent::Message(ClientMessage::DeviceMessage {
                data: "qw==".into()
            }))
        );
    }

    #[test]
    fn test_full_session_any_arrival_order() {
        let mut demux = demux_for(true, true, true);
        let mut events = Vec::new();

        let first = connect(&mut demux, &mut events);
        let second = connect(&mut demux, &mut events);
        let third = connect(&mut demux, &mut events);

        // Audio metadata lands on the second connection before the preamble
        events.extend(demux.feed(second, &audio_meta()));
        assert!(events.is_empty());

        events.extend(demux.feed(first, &preamble("dev")));
        assert!(events.contains(&DemuxEvent::Message(ClientMessage::AudioInfo {
            codec_id: AUDIO_CODEC_AAC
        })));
        assert_eq!(demux.connection_for(StreamRole::Audio), Some(second));
        assert_eq!(count_started(&events), 0);

        // Two unidentified connections remain: no elimination yet
        assert_eq!(demux.connection_for(StreamRole::Control), None);

        events.extend(demux.feed(first, &video_meta(720, 1280)));
        assert_eq!(demux.connection_for(StreamRole::Video), Some(first));
        assert!(events.contains(&DemuxEvent::ControlAssigned(third)));
        assert_eq!(count_started(&events), 1);
    }

    #[test]
    fn test_no_elimination_with_two_unidentified() {
        let mut demux = demux_for(true, true, true);
        let mut events = Vec::new();

        let first = connect(&mut demux, &mut events);
        let _second = connect(&mut demux, &mut events);
        let _third = connect(&mut demux, &mut events);

        let mut data = preamble("dev");
        data.extend(video_meta(720, 1280));
        events.extend(demux.feed(first, &data));

        assert_eq!(demux.connection_for(StreamRole::Control), None);
        assert!(!events
            .iter()
            .any(|e| matches!(e, DemuxEvent::ControlAssigned(_))));
        assert_eq!(count_started(&events), 0);
    }

    #[test]
    fn test_no_elimination_before_all_connections_accepted() {
        let mut demux = demux_for(true, false, true);
        let mut events = Vec::new();

        let video = connect(&mut demux, &mut events);
        let mut data = preamble("dev");
        data.extend(video_meta(720, 1280));
        events.extend(demux.feed(video, &data));

        assert!(!events
            .iter()
            .any(|e| matches!(e, DemuxEvent::ControlAssigned(_))));
    }

    #[test]
    fn test_partial_video_metadata_waits() {
        let mut demux = demux_for(true, false, false);
        let conn = demux.accept().unwrap();
        demux.feed(conn, &preamble("dev"));

        let meta = video_meta(1920, 1080);
        assert!(demux.feed(conn, &meta[..2]).is_empty());
        assert!(demux.feed(conn, &meta[2..8]).is_empty());
        assert_eq!(demux.connection_for(StreamRole::Video), None);

        let events = demux.feed(conn, &meta[8..]);
        assert_eq!(demux.connection_for(StreamRole::Video), Some(conn));
        assert_eq!(count_started(&events), 1);
    }

    #[test]
    fn test_mismatching_codec_id_is_violation_when_control_impossible() {
        let mut demux = demux_for(true, false, false);
        let conn = demux.accept().unwrap();
        demux.feed(conn, &preamble("dev"));

        // "h265" is not something this relay handles
        let events = demux.feed(conn, b"h265\0\0\0\0\0\0\0\0");
        assert_eq!(events, vec![DemuxEvent::Destroy(conn)]);
        assert_eq!(demux.stats().protocol_violations, 1);

        // Further bytes are ignored
        assert!(demux.feed(conn, &video_meta(1, 1)).is_empty());
    }

    #[test]
    fn test_audio_id_on_video_only_session_is_violation() {
        let mut demux = demux_for(true, false, false);
        let conn = demux.accept().unwrap();
        demux.feed(conn, &preamble("dev"));

        let events = demux.feed(conn, &audio_meta());
        assert_eq!(events, vec![DemuxEvent::Destroy(conn)]);
        assert_eq!(demux.connection_for(StreamRole::Audio), None);
    }

    #[test]
    fn test_extra_connection_refused() {
        let mut demux = demux_for(true, false, true);
        assert!(demux.accept().is_some());
        assert!(demux.accept().is_some());
        assert!(demux.accept().is_none());
        assert_eq!(demux.accepted(), 2);
        assert_eq!(demux.stats().connections_refused, 1);
    }

    #[test]
    fn test_only_first_connection_consumes_preamble() {
        let mut demux = demux_for(true, true, false);
        let mut events = Vec::new();
        let first = connect(&mut demux, &mut events);
        let second = connect(&mut demux, &mut events);

        // 64 bytes on the second connection are not a preamble
        let mut data = audio_meta();
        data.extend(vec![0u8; 60]);
        events.extend(demux.feed(second, &data));
        assert!(events.is_empty());

        events.extend(demux.feed(first, &preamble("dev")));
        let names = events
            .iter()
            .filter(|e| matches!(e, DemuxEvent::Message(ClientMessage::DeviceName { .. })))
            .count();
        assert_eq!(names, 1);
        assert_eq!(demux.connection_for(StreamRole::Audio), Some(second));
    }

    #[test]
    fn test_video_packets_after_metadata_in_same_read() {
        let mut demux = demux_for(true, false, false);
        let conn = demux.accept().unwrap();

        let mut config = baseline_sps(80, 45);
        config.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80]);

        let mut data = preamble("dev");
        data.extend(video_meta(1280, 720));
        data.extend(packet(true, false, 0, &config));
        data.extend(packet(false, true, 1000, &[0, 0, 0, 1, 0x65, 0x88]));
        data.extend(packet(false, false, 2000, &[0, 0, 0, 1, 0x41]));

        let events = demux.feed(conn, &data);
        let frames: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                DemuxEvent::Frame(f) => Some(f.tag()),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![2, 3, 4]);

        // Metadata resolution matches the SPS: no resolution change
        assert!(!events.iter().any(|e| matches!(
            e,
            DemuxEvent::Message(ClientMessage::ResolutionChange { .. })
        )));
    }

    #[test]
    fn test_oversized_packet_destroys_only_that_connection() {
        let mut demux = demux_for(true, true, false);
        let mut events = Vec::new();
        let video = connect(&mut demux, &mut events);
        let audio = connect(&mut demux, &mut events);

        let mut data = preamble("dev");
        data.extend(video_meta(1280, 720));
        demux.feed(video, &data);
        demux.feed(audio, &audio_meta());

        let mut header = Vec::new();
        PacketHeader {
            config: false,
            key_frame: false,
            pts: 0,
            payload_len: (MAX_PACKET_SIZE + 1) as u32,
        }
        .encode(&mut header);
        assert_eq!(demux.feed(video, &header), vec![DemuxEvent::Destroy(video)]);

        // The audio connection keeps working
        let events = demux.feed(audio, &packet(true, false, 0, &[0x12, 0x10]));
        assert_eq!(
            events,
            vec![DemuxEvent::Frame(OutboundFrame::AudioConfig {
                raw: Bytes::from_static(&[0x12, 0x10])
            })]
        );
    }

    #[test]
    fn test_bad_audio_config_destroys_audio_connection() {
        let mut demux = demux_for(false, true, false);
        let conn = demux.accept().unwrap();
        let mut data = preamble("dev");
        data.extend(audio_meta());
        demux.feed(conn, &data);

        let events = demux.feed(conn, &packet(true, false, 0, &[0x12, 0x00]));
        assert_eq!(events, vec![DemuxEvent::Destroy(conn)]);
    }

    #[test]
    fn test_remove_reports_empty_session() {
        let mut demux = demux_for(true, false, true);
        let mut events = Vec::new();
        let video = connect(&mut demux, &mut events);
        let mut data = preamble("dev");
        data.extend(video_meta(1280, 720));
        demux.feed(video, &data);

        // Not every expected connection has arrived yet
        assert!(!demux.remove(video));

        let mut demux = demux_for(true, false, true);
        let video = connect(&mut demux, &mut events);
        let control = connect(&mut demux, &mut events);
        let mut data = preamble("dev");
        data.extend(video_meta(1280, 720));
        demux.feed(video, &data);

        assert!(!demux.remove(video));
        assert!(demux.remove(control));
        // Removing twice is harmless
        assert!(demux.remove(control));
    }

    #[test]
    fn test_preamble_connection_lost_before_device_name() {
        let mut demux = demux_for(true, true, false);
        let mut events = Vec::new();
        let first = connect(&mut demux, &mut events);

        // The session cannot learn the device name any more
        assert!(demux.remove(first));
        assert!(events.is_empty());
    }

    #[test]
    fn test_non_owner_lost_before_device_name() {
        let mut demux = demux_for(true, true, false);
        let mut events = Vec::new();
        let first = connect(&mut demux, &mut events);
        let second = connect(&mut demux, &mut events);

        assert!(!demux.remove(second));

        let mut data = preamble("dev");
        data.extend(video_meta(1280, 720));
        events.extend(demux.feed(first, &data));
        assert_eq!(demux.connection_for(StreamRole::Video), Some(first));
    }

    #[test]
    fn test_streaming_started_fires_once() {
        let mut demux = demux_for(true, false, false);
        let conn = demux.accept().unwrap();
        let mut data = preamble("dev");
        data.extend(video_meta(1280, 720));

        let mut events = demux.feed(conn, &data);
        events.extend(demux.feed(conn, &packet(false, true, 0, &[0x65])));
        assert_eq!(count_started(&events), 1);
        assert!(demux.streaming_started());
    }
}

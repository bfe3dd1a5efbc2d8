//! Device media packet header
//!
//! Every packet on the video and audio streams (after metadata) is framed as:
//!
//! ```text
//! +--------+--------+------------------------+--------------+---------+
//! | config | key    | pts (62 bits)          | length (u32) | payload |
//! | bit 63 | bit 62 |                        |              |         |
//! +--------+--------+------------------------+--------------+---------+
//! |<------------- 8 bytes BE ------------->|<-- 4 bytes -->|
//! ```

use bytes::BufMut;

use super::constants::PACKET_HEADER_LENGTH;

const CONFIG_FLAG: u64 = 1 << 63;
const KEY_FRAME_FLAG: u64 = 1 << 62;
const PTS_MASK: u64 = KEY_FRAME_FLAG - 1;

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload carries codec configuration (SPS/PPS or ASC)
    pub config: bool,
    /// Payload is a key frame
    pub key_frame: bool,
    /// Presentation timestamp in microseconds
    pub pts: u64,
    /// Payload length in bytes
    pub payload_len: u32,
}

impl PacketHeader {
    /// Parse a header from the front of `buf`
    ///
    /// Returns `None` if fewer than 12 bytes are available.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let header = buf.get(..PACKET_HEADER_LENGTH)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(&header[..8]);
        let pts_and_flags = u64::from_be_bytes(word);
        let payload_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);

        Some(PacketHeader {
            config: pts_and_flags & CONFIG_FLAG != 0,
            key_frame: pts_and_flags & KEY_FRAME_FLAG != 0,
            pts: pts_and_flags & PTS_MASK,
            payload_len,
        })
    }

    /// Header plus payload length
    pub fn total_len(&self) -> usize {
        PACKET_HEADER_LENGTH + self.payload_len as usize
    }

    /// Write the header in device wire format
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let mut word = self.pts & PTS_MASK;
        if self.config {
            word |= CONFIG_FLAG;
        }
        if self.key_frame {
            word |= KEY_FRAME_FLAG;
        }
        buf.put_u64(word);
        buf.put_u32(self.payload_len);
    }
}

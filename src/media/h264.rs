//! H.264/AVC parsing
//!
//! The device agent sends H.264 in Annex-B format (start-code delimited NAL
//! units). Config packets carry the SPS and PPS; WebCodecs decoders need them
//! repackaged as an AVCDecoderConfigurationRecord:
//!
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | 0xFC | lengthSizeMinusOne (1, = 0xFF)
//! | 0xE0 | numOfSPS (1, = 0xE1) | spsLength (2) | spsNALUnit
//! | numOfPPS (1) | ppsLength (2) | ppsNALUnit
//! ```
//!
//! The SPS parser only extracts what the relay needs: the coded picture size
//! after cropping, plus the profile/compatibility/level bytes.

use bytes::{BufMut, Bytes, BytesMut};

use super::bits::BitReader;
use crate::error::{MediaError, Result};

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            _ => None,
        }
    }
}

/// Profiles whose SPS carries chroma format, bit depth and scaling lists
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// Fields extracted from a Sequence Parameter Set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    /// Display width in pixels (after cropping)
    pub width: u32,
    /// Display height in pixels (after cropping)
    pub height: u32,
    /// profile_idc byte
    pub profile_idc: u8,
    /// constraint_set flags byte
    pub profile_compatibility: u8,
    /// level_idc byte
    pub level_idc: u8,
    /// chroma_format_idc (1 = 4:2:0 unless signalled otherwise)
    pub chroma_format_idc: u32,
    /// frame_mbs_only_flag
    pub frame_mbs_only: bool,
}

/// Length of a leading Annex-B start code (0, 3 or 4)
fn start_code_len(data: &[u8]) -> usize {
    if data.starts_with(&[0, 0, 0, 1]) {
        4
    } else if data.starts_with(&[0, 0, 1]) {
        3
    } else {
        0
    }
}

/// Strip a leading 3- or 4-byte start code, if present
pub fn strip_start_code(nal: &[u8]) -> &[u8] {
    &nal[start_code_len(nal)..]
}

/// Find the next start code at or after `from`, returning (offset, length)
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..data.len()).find_map(|i| match start_code_len(&data[i..]) {
        0 => None,
        len => Some((i, len)),
    })
}

/// Find the first NAL unit of the given type in an Annex-B buffer
///
/// The returned slice includes its start code and extends up to the next
/// start code (or the end of the buffer).
pub fn find_nal_unit(data: &[u8], nal_type: NaluType) -> Option<&[u8]> {
    let mut offset = 0;

    while let Some((start, len)) = find_start_code(data, offset) {
        let header = start + len;
        if header >= data.len() {
            return None;
        }

        if NaluType::from_byte(data[header]) == Some(nal_type) {
            let end = find_start_code(data, header).map_or(data.len(), |(next, _)| next);
            return Some(&data[start..end]);
        }

        offset = header;
    }

    None
}

/// Remove emulation prevention bytes (0x00 0x00 0x03 -> 0x00 0x00)
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;

    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }

    out
}

/// Parse an SPS NAL unit (with or without start code)
///
/// Returns `None` for anything that is not a well-formed SPS. Devices
/// occasionally emit cosmetically broken SPS on stream restart, so callers
/// treat `None` as "skip", never as a fatal error.
pub fn parse_sps(nal: &[u8]) -> Option<SpsInfo> {
    let nal = strip_start_code(nal);
    if nal.len() < 4 || NaluType::from_byte(nal[0]) != Some(NaluType::Sps) {
        return None;
    }

    let rbsp = remove_emulation_prevention(&nal[1..]);
    let mut reader = BitReader::new(&rbsp);

    let profile_idc = reader.read_bits(8)? as u8;
    let profile_compatibility = reader.read_bits(8)? as u8;
    let level_idc = reader.read_bits(8)? as u8;

    // seq_parameter_set_id
    reader.read_ue()?;

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    if HIGH_PROFILES.contains(&profile_idc) {
        chroma_format_idc = reader.read_ue()?;
        if chroma_format_idc > 3 {
            return None;
        }
        if chroma_format_idc == 3 {
            separate_colour_plane = reader.read_bool()?;
        }
        // bit_depth_luma_minus8, bit_depth_chroma_minus8
        reader.read_ue()?;
        reader.read_ue()?;
        // qpprime_y_zero_transform_bypass_flag
        reader.read_bool()?;

        if reader.read_bool()? {
            let list_count = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..list_count {
                if reader.read_bool()? {
                    skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    // log2_max_frame_num_minus4
    reader.read_ue()?;

    match reader.read_ue()? {
        0 => {
            // log2_max_pic_order_cnt_lsb_minus4
            reader.read_ue()?;
        }
        1 => {
            // delta_pic_order_always_zero_flag, offset_for_non_ref_pic,
            // offset_for_top_to_bottom_field
            reader.read_bool()?;
            reader.read_se()?;
            reader.read_se()?;
            let cycle = reader.read_ue()?;
            for _ in 0..cycle {
                reader.read_se()?;
            }
        }
        _ => {}
    }

    // max_num_ref_frames, gaps_in_frame_num_value_allowed_flag
    reader.read_ue()?;
    reader.read_bool()?;

    let width_in_mbs = reader.read_ue()? as u64 + 1;
    let height_in_map_units = reader.read_ue()? as u64 + 1;
    let frame_mbs_only = reader.read_bool()?;
    if !frame_mbs_only {
        // mb_adaptive_frame_field_flag
        reader.read_bool()?;
    }
    // direct_8x8_inference_flag
    reader.read_bool()?;

    let field_factor: u64 = if frame_mbs_only { 1 } else { 2 };
    let mut width = width_in_mbs * 16;
    let mut height = field_factor * height_in_map_units * 16;

    if reader.read_bool()? {
        let left = reader.read_ue()? as u64;
        let right = reader.read_ue()? as u64;
        let top = reader.read_ue()? as u64;
        let bottom = reader.read_ue()? as u64;

        let (sub_width_c, sub_height_c) = match (separate_colour_plane, chroma_format_idc) {
            (true, _) => (1, 1),
            (false, 1) => (2, 2),
            (false, 2) => (2, 1),
            _ => (1, 1),
        };
        let crop_unit_x = sub_width_c;
        let crop_unit_y = sub_height_c * field_factor;

        width = width.checked_sub((left + right) * crop_unit_x)?;
        height = height.checked_sub((top + bottom) * crop_unit_y)?;
    }

    Some(SpsInfo {
        width: u32::try_from(width).ok()?,
        height: u32::try_from(height).ok()?,
        profile_idc,
        profile_compatibility,
        level_idc,
        chroma_format_idc,
        frame_mbs_only,
    })
}

/// Skip one scaling list of `size` coefficients
fn skip_scaling_list(reader: &mut BitReader<'_>, size: usize) -> Option<()> {
    let mut last_scale: i32 = 8;
    let mut next_scale: i32 = 8;

    for _ in 0..size {
        if next_scale != 0 {
            let delta = reader.read_se()?;
            next_scale = (last_scale + delta).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }

    Some(())
}

/// AVC decoder configuration built from a single SPS/PPS pair
#[derive(Debug, Clone)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// Profile compatibility flags
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// SPS without start code
    pub sps: Bytes,
    /// PPS without start code
    pub pps: Bytes,
    /// Raw AVCDecoderConfigurationRecord bytes
    pub raw: Bytes,
}

impl AvcConfig {
    /// Build an AVCDecoderConfigurationRecord from SPS and PPS NAL units
    ///
    /// Start codes are stripped if present.
    pub fn from_parameter_sets(sps: &[u8], pps: &[u8]) -> Result<Self> {
        let sps = strip_start_code(sps);
        let pps = strip_start_code(pps);

        if sps.len() < 4 {
            return Err(MediaError::SpsTooShort(sps.len()).into());
        }
        if pps.is_empty() {
            return Err(MediaError::EmptyPps.into());
        }
        let sps_len = u16::try_from(sps.len())
            .map_err(|_| MediaError::ParameterSetTooLarge(sps.len()))?;
        let pps_len = u16::try_from(pps.len())
            .map_err(|_| MediaError::ParameterSetTooLarge(pps.len()))?;

        let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
        buf.put_u8(1); // configurationVersion
        buf.put_u8(sps[1]);
        buf.put_u8(sps[2]);
        buf.put_u8(sps[3]);
        buf.put_u8(0xFC | 3); // 4-byte NALU lengths
        buf.put_u8(0xE0 | 1); // one SPS
        buf.put_u16(sps_len);
        buf.put_slice(sps);
        buf.put_u8(1); // one PPS
        buf.put_u16(pps_len);
        buf.put_slice(pps);

        Ok(AvcConfig {
            profile: sps[1],
            compatibility: sps[2],
            level: sps[3],
            sps: Bytes::copy_from_slice(sps),
            pps: Bytes::copy_from_slice(pps),
            raw: buf.freeze(),
        })
    }

    /// Get profile name
    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        }
    }

    /// Get level as string (e.g., "3.1")
    pub fn level_string(&self) -> String {
        format!("{}.{}", self.level / 10, self.level % 10)
    }
}

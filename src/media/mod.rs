//! Media bitstream handling
//!
//! This module provides:
//! - An MSB-first bit reader with Exp-Golomb support
//! - H.264 SPS parsing, NAL unit extraction and AVCC record building
//! - AAC AudioSpecificConfig parsing

pub mod aac;
pub mod bits;
pub mod h264;

pub use aac::{AacProfile, AudioSpecificConfig};
pub use bits::BitReader;
pub use h264::{find_nal_unit, parse_sps, AvcConfig, NaluType, SpsInfo};

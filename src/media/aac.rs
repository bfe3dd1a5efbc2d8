//! AAC audio configuration parsing
//!
//! The device agent sends raw AAC (no ADTS headers). The first packet on the
//! audio stream is a config packet carrying the AudioSpecificConfig:
//!
//! ```text
//! audioObjectType: 5 bits
//! samplingFrequencyIndex: 4 bits
//! if (samplingFrequencyIndex == 0xf) samplingFrequency: 24 bits
//! channelConfiguration: 4 bits
//! ... more optional fields (ignored)
//! ```

use bytes::Bytes;

use super::bits::BitReader;
use crate::error::{MediaError, Result};

/// AAC profile (audio object type)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacProfile {
    /// AAC Main
    Main = 1,
    /// AAC LC (Low Complexity) - most common
    Lc = 2,
    /// AAC SSR (Scalable Sample Rate)
    Ssr = 3,
    /// AAC LTP (Long Term Prediction)
    Ltp = 4,
    /// SBR (Spectral Band Replication) - HE-AAC
    Sbr = 5,
    /// AAC Scalable
    Scalable = 6,
    /// Parametric Stereo - HE-AAC v2
    Ps = 29,
}

impl AacProfile {
    pub fn from_object_type(ot: u8) -> Option<Self> {
        match ot {
            1 => Some(AacProfile::Main),
            2 => Some(AacProfile::Lc),
            3 => Some(AacProfile::Ssr),
            4 => Some(AacProfile::Ltp),
            5 => Some(AacProfile::Sbr),
            6 => Some(AacProfile::Scalable),
            29 => Some(AacProfile::Ps),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AacProfile::Main => "AAC Main",
            AacProfile::Lc => "AAC LC",
            AacProfile::Ssr => "AAC SSR",
            AacProfile::Ltp => "AAC LTP",
            AacProfile::Sbr => "HE-AAC",
            AacProfile::Scalable => "AAC Scalable",
            AacProfile::Ps => "HE-AAC v2",
        }
    }
}

/// Validated AudioSpecificConfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type (profile)
    pub profile: AacProfile,
    /// Sampling frequency index (15 = explicit)
    pub sampling_frequency_index: u8,
    /// Sampling frequency in Hz
    pub sampling_frequency: u32,
    /// Channel configuration (1=mono, 2=stereo, ... 7=7.1)
    pub channel_configuration: u8,
    /// Raw config bytes, forwarded to the client untouched
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    /// Standard sampling frequencies by index
    const SAMPLING_FREQUENCIES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];

    /// Parse and validate an AudioSpecificConfig
    ///
    /// Rejects unknown object types, unknown sample rate indices (or an
    /// explicit rate of zero) and channel configurations outside 1..=7.
    pub fn parse(data: Bytes) -> Result<Self> {
        let mut reader = BitReader::new(&data);

        let object_type = reader.read_bits(5).ok_or(MediaError::TruncatedAudioConfig)? as u8;
        let sampling_frequency_index =
            reader.read_bits(4).ok_or(MediaError::TruncatedAudioConfig)? as u8;

        let sampling_frequency = if sampling_frequency_index == 0x0F {
            reader.read_bits(24).ok_or(MediaError::TruncatedAudioConfig)?
        } else {
            Self::SAMPLING_FREQUENCIES
                .get(sampling_frequency_index as usize)
                .copied()
                .unwrap_or(0)
        };

        let channel_configuration =
            reader.read_bits(4).ok_or(MediaError::TruncatedAudioConfig)? as u8;

        let profile = AacProfile::from_object_type(object_type)
            .ok_or(MediaError::UnsupportedObjectType(object_type))?;
        if sampling_frequency == 0 {
            return Err(MediaError::UnsupportedSampleRate(sampling_frequency_index).into());
        }
        if !(1..=7).contains(&channel_configuration) {
            return Err(MediaError::UnsupportedChannelConfig(channel_configuration).into());
        }

        Ok(AudioSpecificConfig {
            profile,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration,
            raw: data,
        })
    }

    /// Get channel count
    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            7 => 8, // 7.1
            n => n,
        }
    }
}

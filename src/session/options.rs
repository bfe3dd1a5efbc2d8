//! Per-session options requested by the client

use std::fmt;

/// Role of a classified device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    Video,
    Audio,
    Control,
}

impl StreamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamRole::Video => "video",
            StreamRole::Audio => "audio",
            StreamRole::Control => "control",
        }
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subset of {video, audio, control} requested for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSet {
    pub video: bool,
    pub audio: bool,
    pub control: bool,
}

impl StreamSet {
    pub fn new(video: bool, audio: bool, control: bool) -> Self {
        Self {
            video,
            audio,
            control,
        }
    }

    pub fn contains(&self, role: StreamRole) -> bool {
        match role {
            StreamRole::Video => self.video,
            StreamRole::Audio => self.audio,
            StreamRole::Control => self.control,
        }
    }

    /// Number of device connections the agent will open
    pub fn len(&self) -> usize {
        [self.video, self.audio, self.control]
            .iter()
            .filter(|&&on| on)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client-side decoder the frames are shaped for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecoderKind {
    /// AVCC config + timestamped key/delta frames
    #[default]
    WebCodecs,
    /// Raw Annex-B payloads, no timestamps
    Legacy,
}

/// Options for starting a session
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Streams the agent should open
    pub streams: StreamSet,

    /// Client decoder preference
    pub decoder: DecoderKind,

    /// Send a screen-off command once streaming starts (requires control)
    pub turn_screen_off: bool,

    /// Extra `key=value` options passed through to the agent
    pub agent_options: Vec<(String, String)>,
}

impl SessionOptions {
    pub fn new(streams: StreamSet) -> Self {
        Self {
            streams,
            ..Default::default()
        }
    }

    /// Set the decoder preference
    pub fn decoder(mut self, decoder: DecoderKind) -> Self {
        self.decoder = decoder;
        self
    }

    /// Turn the device screen off once streaming starts
    pub fn turn_screen_off(mut self, enabled: bool) -> Self {
        self.turn_screen_off = enabled;
        self
    }

    /// Add an agent option
    pub fn agent_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.agent_options.push((key.into(), value.into()));
        self
    }

    /// Agent arguments after the version: `scid=...`, stream flags, extras
    pub fn agent_args(&self, scid: &str) -> Vec<String> {
        let mut args = vec![
            format!("scid={}", scid),
            format!("video={}", self.streams.video),
            format!("audio={}", self.streams.audio),
            format!("control={}", self.streams.control),
        ];
        args.extend(
            self.agent_options
                .iter()
                .map(|(key, value)| format!("{}={}", key, value)),
        );
        args
    }
}

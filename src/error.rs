//! Error types
//!
//! Errors are grouped by the layer that produces them. Parsers return
//! [`MediaError`], session setup and lookup return [`SessionError`], and the
//! device collaborator returns [`DeviceError`]. Everything converts into the
//! top-level [`Error`].

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bitstream and codec configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("SPS or PPS NAL unit is missing")]
    MissingParameterSet,

    #[error("SPS too short: {0} bytes")]
    SpsTooShort(usize),

    #[error("empty PPS")]
    EmptyPps,

    #[error("parameter set too large for AVCC record: {0} bytes")]
    ParameterSetTooLarge(usize),

    #[error("AudioSpecificConfig truncated")]
    TruncatedAudioConfig,

    #[error("unsupported AAC object type: {0}")]
    UnsupportedObjectType(u8),

    #[error("unsupported sample rate index: {0}")]
    UnsupportedSampleRate(u8),

    #[error("unsupported channel configuration: {0}")]
    UnsupportedChannelConfig(u8),
}

/// Session lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no streams enabled")]
    NoStreamsRequested,

    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("session {0} was stopped during setup")]
    Cancelled(String),

    #[error("session {0} is shutting down")]
    Closed(String),

    #[error("session {0} has no control stream")]
    NoControl(String),

    #[error("control codec error: {0}")]
    ControlCodec(String),
}

/// Device collaborator errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("{label} failed: {message}")]
    CommandFailed { label: String, message: String },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from {command}: {output}")]
    UnexpectedOutput { command: String, output: String },
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

//! Device connection classification and reframing
//!
//! This module is I/O free. The session task feeds it raw bytes per
//! connection and acts on the [`DemuxEvent`]s it returns.

pub mod connection;
pub mod demux;
pub mod options;
pub mod reframe;

pub use connection::{ConnId, Connection, ConnectionState};
pub use demux::{DemuxEvent, DemuxLimits, SessionDemux};
pub use options::{DecoderKind, SessionOptions, StreamRole, StreamSet};
pub use reframe::MediaState;

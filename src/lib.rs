//! scrcpy session relay
//!
//! Bridges an Android device running the scrcpy agent to a browser client.
//! For each session the relay deploys and launches the agent, accepts its
//! video/audio/control TCP connections, works out which connection is which
//! from the bytes alone, and re-frames the media into a compact binary format
//! for WebCodecs (or a legacy Annex-B passthrough). Control input from the
//! client flows back to the device through a control worker.
//!
//! ```text
//!   device agent ──TCP×N──► SessionDemux ──► ClientSink ──► browser
//!        ▲                      │
//!        └──── control ◄── ControlBridge ◄── SessionManager::send_control
//! ```
//!
//! # Example
//!
//! ```no_run
//! use scrcpy_relay::{AdbBridge, RelayConfig, SessionManager, SessionOptions, StreamSet};
//!
//! # async fn run() -> scrcpy_relay::Result<()> {
//! let manager = SessionManager::new(
//!     RelayConfig::default(),
//!     AdbBridge::new("/opt/scrcpy/scrcpy-server"),
//! );
//!
//! let (client_tx, mut client_rx) = manager.client_channel();
//! let options = SessionOptions::new(StreamSet::new(true, true, true)).turn_screen_off(true);
//! let session = manager
//!     .start("emulator-5554", "1a2b3c4d", 27183, options, client_tx)
//!     .await?;
//!
//! while let Some(item) = client_rx.recv().await {
//!     // forward `item` to the browser
//! #   let _ = item;
//! }
//!
//! manager.stop(&session.scid).await;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod client;
pub mod control;
pub mod device;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use buffer::DynamicBuffer;
pub use client::ClientSink;
pub use control::{ControlCodec, PassthroughCodec};
pub use device::{AdbBridge, AgentProcess, DeviceBridge, ProcessController, ProcessEvent};
pub use error::{DeviceError, Error, MediaError, Result, SessionError};
pub use protocol::{ClientMessage, Outbound, OutboundFrame};
pub use registry::{SessionInfo, SessionRegistry};
pub use server::{RelayConfig, SessionManager};
pub use session::{DecoderKind, SessionOptions, StreamRole, StreamSet};

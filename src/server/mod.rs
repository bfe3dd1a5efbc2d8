//! Session management
//!
//! - [`SessionManager`]: start/stop sessions, route control input
//! - [`RelayConfig`]: relay-wide settings
//! - one task per session owning its listener, demux and agent process

pub mod config;
pub(crate) mod listener;
pub mod manager;
pub(crate) mod session_task;

pub use config::RelayConfig;
pub use manager::{CodecFactory, SessionManager};

//! Device collaborator
//!
//! [`DeviceBridge`] abstracts agent deployment, tunnels, the agent process and
//! battery queries. [`AdbBridge`] implements it on top of the `adb` binary.

pub mod adb;
pub mod bridge;
pub mod tunnel;

pub use adb::AdbBridge;
pub use bridge::{AgentProcess, DeviceBridge, ProcessController, ProcessEvent};
pub use tunnel::ReverseTunnel;

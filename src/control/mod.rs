//! Client-to-device control relay

pub mod bridge;
pub mod worker;

pub use bridge::ControlBridge;
pub use worker::{ControlCodec, ControlWorker, PassthroughCodec, WorkerEvent};

//! Reverse tunnel lifecycle
//!
//! The device agent connects to `localabstract:scrcpy_<scid>`, which a
//! reverse tunnel forwards to the session's local listener. Remove-then-create
//! on the same tunnel name is serialized through a per-name lock; tunnels of
//! other sessions on the same device are never touched.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::bridge::DeviceBridge;
use crate::error::DeviceError;
use crate::protocol::constants::tunnel_name;

/// A session's reverse tunnel
#[derive(Debug)]
pub struct ReverseTunnel {
    device: String,
    name: String,
    lock: Arc<Mutex<()>>,
    active: bool,
}

impl ReverseTunnel {
    pub fn new(device: impl Into<String>, scid: &str, lock: Arc<Mutex<()>>) -> Self {
        Self {
            device: device.into(),
            name: tunnel_name(scid),
            lock,
            active: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tunnel was created and not yet removed
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Create the tunnel to `tcp:<port>`, removing a stale one first
    pub async fn open<D: DeviceBridge>(
        &mut self,
        bridge: &D,
        port: u16,
    ) -> Result<(), DeviceError> {
        let _guard = self.lock.lock().await;

        if bridge.reverse_tunnel_exists(&self.device, &self.name).await? {
            debug!(device = %self.device, tunnel = %self.name, "Removing stale tunnel");
            bridge
                .execute_command(self.remove_args(), "Remove stale tunnel")
                .await?;
        }

        bridge
            .execute_command(
                vec![
                    "-s".into(),
                    self.device.clone(),
                    "reverse".into(),
                    self.name.clone(),
                    format!("tcp:{}", port),
                ],
                "Setup reverse tunnel",
            )
            .await?;
        self.active = true;

        info!(device = %self.device, tunnel = %self.name, port, "Reverse tunnel created");
        Ok(())
    }

    /// Remove the tunnel if it is still active and registered
    ///
    /// Clears the active flag even when removal fails so that teardown does
    /// not retry.
    pub async fn close<D: DeviceBridge>(
        &mut self,
        bridge: &D,
        label: &str,
    ) -> Result<(), DeviceError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        let _guard = self.lock.lock().await;
        if bridge.reverse_tunnel_exists(&self.device, &self.name).await? {
            bridge.execute_command(self.remove_args(), label).await?;
            info!(device = %self.device, tunnel = %self.name, "Reverse tunnel removed");
        }
        Ok(())
    }

    fn remove_args(&self) -> Vec<String> {
        vec![
            "-s".into(),
            self.device.clone(),
            "reverse".into(),
            "--remove".into(),
            self.name.clone(),
        ]
    }
}

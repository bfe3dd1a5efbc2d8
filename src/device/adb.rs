//! `adb` backed [`DeviceBridge`]

use std::path::PathBuf;
use std::process::Stdio;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::bridge::{AgentProcess, DeviceBridge, ProcessEvent};
use crate::error::DeviceError;

const PROCESS_EVENT_CAPACITY: usize = 64;
const STDOUT_CHUNK_SIZE: usize = 4096;

/// Runs device commands through the `adb` binary
#[derive(Debug, Clone)]
pub struct AdbBridge {
    program: String,
    server_local_path: PathBuf,
}

impl AdbBridge {
    pub fn new(server_local_path: impl Into<PathBuf>) -> Self {
        Self {
            program: "adb".into(),
            server_local_path: server_local_path.into(),
        }
    }

    /// Use a specific `adb` binary
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, args: &[String], label: &str) -> Result<String, DeviceError> {
        debug!(program = %self.program, ?args, "Running device command");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| DeviceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DeviceError::CommandFailed {
                label: label.to_string(),
                message: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DeviceBridge for AdbBridge {
    async fn push_server(&self, device: &str, device_path: &str) -> Result<(), DeviceError> {
        let args = vec![
            "-s".to_string(),
            device.to_string(),
            "push".to_string(),
            self.server_local_path.display().to_string(),
            device_path.to_string(),
        ];
        self.run(&args, "Push server").await.map(|_| ())
    }

    async fn reverse_tunnel_exists(&self, device: &str, name: &str) -> Result<bool, DeviceError> {
        let args = vec![
            "-s".to_string(),
            device.to_string(),
            "reverse".to_string(),
            "--list".to_string(),
        ];
        let listing = self.run(&args, "List reverse tunnels").await?;
        Ok(listing_contains_tunnel(&listing, name))
    }

    async fn execute_command(&self, args: Vec<String>, label: &str) -> Result<String, DeviceError> {
        self.run(&args, label).await
    }

    async fn shell(&self, device: &str, command: &str) -> Result<AgentProcess, DeviceError> {
        let mut child = Command::new(&self.program)
            .args(["-s", device, "shell", command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DeviceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (controller, process) = AgentProcess::channel(PROCESS_EVENT_CAPACITY);
        let mut stdout = child.stdout.take();
        let events = controller.events;
        let mut stop = controller.stop;

        tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(STDOUT_CHUNK_SIZE);
            loop {
                let read = async {
                    match stdout.as_mut() {
                        Some(out) => out.read_buf(&mut buf).await,
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    _ = &mut stop => {
                        if let Err(e) = child.kill().await {
                            warn!(error = %e, "Failed to kill agent process");
                        }
                        break;
                    }
                    result = read => match result {
                        Ok(0) => {
                            let event = match child.wait().await {
                                Ok(status) if status.success() => ProcessEvent::End,
                                Ok(status) => {
                                    ProcessEvent::Error(format!("agent exited with {}", status))
                                }
                                Err(e) => ProcessEvent::Error(e.to_string()),
                            };
                            let _ = events.send(event).await;
                            break;
                        }
                        Ok(_) => {
                            let chunk = buf.split().freeze();
                            if events.send(ProcessEvent::Output(chunk)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = events.send(ProcessEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                }
            }
        });

        Ok(process)
    }

    async fn battery_level(&self, device: &str) -> Result<u8, DeviceError> {
        let args = vec![
            "-s".to_string(),
            device.to_string(),
            "shell".to_string(),
            "dumpsys".to_string(),
            "battery".to_string(),
        ];
        let output = self.run(&args, "Battery query").await?;
        parse_battery_level(&output).ok_or_else(|| DeviceError::UnexpectedOutput {
            command: "dumpsys battery".into(),
            output: output.trim().chars().take(200).collect(),
        })
    }
}

/// Find a tunnel name in `adb reverse --list` output
///
/// Lines look like `<serial> localabstract:scrcpy_1a2b3c4d tcp:27183`.
fn listing_contains_tunnel(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().any(|token| token == name))
}

/// Extract `level: N` from `dumpsys battery` output
pub fn parse_battery_level(output: &str) -> Option<u8> {
    output.lines().find_map(|line| {
        let value = line.trim().strip_prefix("level:")?;
        value.trim().parse::<u8>().ok()
    })
}

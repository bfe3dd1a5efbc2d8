//! Per-session device listener
//!
//! Binds the local port the reverse tunnel forwards to, configures accepted
//! sockets and runs one reader task per device connection.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::server::config::RelayConfig;
use crate::session::ConnId;

/// Reader task output
#[derive(Debug)]
pub(crate) enum ConnEvent {
    /// Bytes read from a device connection
    Data(ConnId, Bytes),
    /// The connection reached EOF or failed
    Closed { id: ConnId, error: Option<String> },
}

/// TCP listener for the device agent's connections
#[derive(Debug)]
pub(crate) struct DeviceListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    tcp_nodelay: bool,
}

impl DeviceListener {
    /// Bind on the configured host; port 0 picks a free port
    pub(crate) async fn bind(config: &RelayConfig, port: u16) -> Result<Self, SessionError> {
        let addr = SocketAddr::new(config.listen_host, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SessionError::Bind { port, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| SessionError::Bind { port, source })?;

        tracing::info!(addr = %local_addr, "Device listener bound");

        Ok(Self {
            listener,
            local_addr,
            tcp_nodelay: config.tcp_nodelay,
        })
    }

    pub(crate) fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub(crate) async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    pub(crate) fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}

/// Spawn the reader task for one device connection
pub(crate) fn spawn_reader(
    id: ConnId,
    reader: OwnedReadHalf,
    chunk_size: usize,
    events: mpsc::Sender<ConnEvent>,
) -> JoinHandle<()> {
    tokio::spawn(read_connection(id, reader, chunk_size, events))
}

async fn read_connection(
    id: ConnId,
    mut reader: OwnedReadHalf,
    chunk_size: usize,
    events: mpsc::Sender<ConnEvent>,
) {
    let mut buf = BytesMut::with_capacity(chunk_size);

    let error = loop {
        buf.reserve(chunk_size);
        match reader.read_buf(&mut buf).await {
            Ok(0) => break None,
            Ok(_) => {
                let data = buf.split().freeze();
                if events.send(ConnEvent::Data(id, data)).await.is_err() {
                    // Session task is gone
                    return;
                }
            }
            Err(e) => break Some(e.to_string()),
        }
    };

    tracing::debug!(conn = id, error = ?error, "Device connection closed");
    let _ = events.send(ConnEvent::Closed { id, error }).await;
}

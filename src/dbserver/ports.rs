//! Discovery of the dynamic port each player's db service listens on.
//!
//! Players answer a fixed query on a well-known port with the two-byte port
//! number of their database service. Results are cached per device; a
//! device that refuses the connection simply does not expose the service,
//! which is a benign outcome, not an error.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::status::DeviceRecord;

/// Well-known port answering db-service port queries.
pub const DB_SERVER_QUERY_PORT: u16 = 12523;

/// Query payload: a 4-byte length prefix, the ASCII service name, and a NUL.
const PORT_QUERY_PACKET: [u8; 19] = *b"\x00\x00\x00\x0fRemoteDBServer\x00";

/// Outcome of a port query for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortResolution {
    Resolved(u16),
    /// The device does not expose the service (or the last attempt failed);
    /// the next announcement retries.
    Unknown,
}

/// Per-device cache of resolved db-service ports.
pub struct PortCache {
    ports: RwLock<HashMap<u8, PortResolution>>,
    connect_timeout: Duration,
    read_timeout: Duration,
    query_port: u16,
}

impl PortCache {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self::with_query_port(connect_timeout, read_timeout, DB_SERVER_QUERY_PORT)
    }

    /// Point port queries somewhere other than the well-known port.
    /// Simulated players listen on ephemeral ports.
    pub fn with_query_port(
        connect_timeout: Duration,
        read_timeout: Duration,
        query_port: u16,
    ) -> Self {
        Self {
            ports: RwLock::new(HashMap::new()),
            connect_timeout,
            read_timeout,
            query_port,
        }
    }

    /// Query `device` for its db-service port and record the outcome.
    /// Failures resolve to [`PortResolution::Unknown`] rather than raising;
    /// status tracking must keep working when one device misbehaves.
    pub async fn resolve(&self, device: &DeviceRecord) -> PortResolution {
        let resolution = query_port(
            device.address,
            self.query_port,
            self.connect_timeout,
            self.read_timeout,
            device.number,
        )
        .await;
        self.ports.write().await.insert(device.number, resolution);
        resolution
    }

    pub async fn get(&self, device_number: u8) -> Option<PortResolution> {
        self.ports.read().await.get(&device_number).copied()
    }

    /// Drop the entry for a device that left the network.
    pub async fn evict(&self, device_number: u8) {
        self.ports.write().await.remove(&device_number);
    }

    pub async fn clear(&self) {
        self.ports.write().await.clear();
    }
}

async fn query_port(
    address: IpAddr,
    query_port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    device_number: u8,
) -> PortResolution {
    let addr = format!("{address}:{query_port}");
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            info!(
                player = device_number,
                "device doesn't answer db-service port queries, connection refused; \
                 won't attempt to request metadata"
            );
            return PortResolution::Unknown;
        }
        Ok(Err(e)) => {
            warn!(player = device_number, error = %e, "problem requesting db-service port");
            return PortResolution::Unknown;
        }
        Err(_) => {
            warn!(player = device_number, "db-service port query timed out");
            return PortResolution::Unknown;
        }
    };

    match exchange(stream, read_timeout).await {
        Ok(port) => {
            debug!(player = device_number, port, "resolved db-service port");
            PortResolution::Resolved(port)
        }
        Err(e) => {
            warn!(player = device_number, error = %e, "problem requesting db-service port");
            PortResolution::Unknown
        }
    }
}

async fn exchange(mut stream: TcpStream, read_timeout: Duration) -> std::io::Result<u16> {
    stream.write_all(&PORT_QUERY_PACKET).await?;
    let mut buffer = [0u8; 32];
    let len = tokio::time::timeout(read_timeout, stream.read(&mut buffer))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "port query read"))??;
    if len != 2 {
        warn!(
            expected = 2,
            received = len,
            "unexpected size reading db-service port query response"
        );
    }
    if len < 2 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "port query response shorter than two bytes",
        ));
    }
    Ok(u16::from_be_bytes([buffer[0], buffer[1]]))
}

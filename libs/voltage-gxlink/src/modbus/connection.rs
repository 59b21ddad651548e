//! Modbus TCP connection
//!
//! Owns the socket and reads exactly one MBAP frame per receive.

use super::constants;
use crate::error::{GxLinkError, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct ModbusConnection {
    stream: TcpStream,
    peer: String,
    /// A frame was only partly read or written; byte boundaries are lost
    desynced: bool,
}

impl ModbusConnection {
    /// Connect, bounded by `connect_timeout`
    pub async fn connect_tcp(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                Ok(Self {
                    stream,
                    peer: addr,
                    desynced: false,
                })
            },
            Ok(Err(e)) => {
                error!("TCP err: {} - {}", addr, e);
                Err(GxLinkError::connection(format!(
                    "Failed to connect to {addr}: {e}"
                )))
            },
            Err(_) => {
                warn!("TCP timeout: {}", addr);
                Err(GxLinkError::ConnectTimeout(addr))
            },
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// True once the stream can no longer be split into frames
    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        if let Err(e) = self.stream.write_all(data).await {
            error!("TCP TX: {}", e);
            self.desynced = true;
            return Err(GxLinkError::connection(format!("TCP send error: {e}")));
        }
        debug!("TCP TX: {}B", data.len());
        Ok(())
    }

    /// Read one complete frame into `buffer`, returning its length.
    ///
    /// Only a header timeout with nothing received leaves the stream usable.
    pub async fn receive(&mut self, buffer: &mut [u8], read_timeout: Duration) -> Result<usize> {
        // [Transaction ID(2)][Protocol ID(2)][Length(2)][Unit ID(1)][PDU(N)]
        let mut header = [0u8; constants::MBAP_HEADER_LEN];
        self.fill(&mut header, read_timeout, "header", false).await?;

        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        if length == 0 || length > constants::MAX_MBAP_LENGTH {
            error!("TCP invalid len: {}", length);
            self.desynced = true;
            return Err(GxLinkError::invalid_data(format!(
                "Invalid TCP frame length: {length}"
            )));
        }

        let total_size = constants::MBAP_HEADER_LEN + length;
        if buffer.len() < total_size {
            self.desynced = true;
            return Err(GxLinkError::invalid_data(format!(
                "Buffer too small for frame: need={} have={}",
                total_size,
                buffer.len()
            )));
        }
        buffer[..constants::MBAP_HEADER_LEN].copy_from_slice(&header);

        self.fill(
            &mut buffer[constants::MBAP_HEADER_LEN..total_size],
            read_timeout,
            "PDU",
            true,
        )
        .await?;
        debug!("TCP RX: {}B", total_size);
        Ok(total_size)
    }

    /// Fill `buf` within `read_timeout`, tracking how much arrived
    async fn fill(
        &mut self,
        buf: &mut [u8],
        read_timeout: Duration,
        part: &str,
        mid_frame: bool,
    ) -> Result<()> {
        let deadline = Instant::now() + read_timeout;
        let mut filled = 0;

        while filled < buf.len() {
            let err = match timeout_at(deadline, self.stream.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => {
                    GxLinkError::connection(format!("TCP {part} read error: connection closed"))
                },
                Ok(Ok(n)) => {
                    filled += n;
                    continue;
                },
                Ok(Err(e)) => {
                    error!("TCP {} RX: {}", part, e);
                    GxLinkError::connection(format!("TCP {part} read error: {e}"))
                },
                Err(_) => {
                    debug!("TCP {} timeout after {}B", part, filled);
                    GxLinkError::timeout(format!("TCP {part} read timeout"))
                },
            };

            if mid_frame || filled > 0 || !matches!(err, GxLinkError::Timeout(_)) {
                self.desynced = true;
            }
            return Err(err);
        }
        Ok(())
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("TCP shutdown {}: {}", self.peer, e);
        }
        info!("TCP closed: {}", self.peer);
    }
}

//! Modbus TCP client
//!
//! One connection, strictly sequential requests. Batch reads degrade per
//! register instead of failing the call; only a missing connection aborts.
//! A frame cut off mid-way drops the connection, since later responses can
//! no longer be delimited.

use super::batch::plan_batches;
use super::codec::{decode_value, exception_description};
use super::connection::ModbusConnection;
use super::constants;
use super::frame::FrameProcessor;
use super::pdu::ModbusPdu;
use crate::error::{GxLinkError, Result};
use crate::registers::{RawValue, RegisterDefinition, RegisterReadResult};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Reading,
    Closed,
}

#[derive(Debug)]
pub struct ModbusClient {
    state: ClientState,
    connection: Option<ModbusConnection>,
    frames: FrameProcessor,
    unit_id: u8,
    connect_timeout: Duration,
    read_timeout: Duration,
    buffer: Vec<u8>,
}

impl ModbusClient {
    pub fn new() -> Self {
        Self::with_timeouts(constants::CONNECT_TIMEOUT, constants::READ_TIMEOUT)
    }

    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            state: ClientState::Disconnected,
            connection: None,
            frames: FrameProcessor::new(),
            unit_id: 1,
            connect_timeout,
            read_timeout,
            buffer: vec![0u8; constants::MODBUS_RESPONSE_BUFFER_SIZE],
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if let Some(old) = self.connection.take() {
            old.shutdown().await;
        }

        self.state = ClientState::Connecting;
        match ModbusConnection::connect_tcp(host, port, self.connect_timeout).await {
            Ok(conn) => {
                self.connection = Some(conn);
                self.frames = FrameProcessor::new();
                self.state = ClientState::Connected;
                Ok(())
            },
            Err(e) => {
                self.state = ClientState::Disconnected;
                Err(e)
            },
        }
    }

    /// Target unit for subsequent requests; no I/O
    pub fn set_unit_id(&mut self, unit_id: u8) {
        self.unit_id = unit_id;
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Read `count` holding registers starting at `address` in one request
    pub async fn read_raw_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        if self.connection.is_none() {
            return Err(GxLinkError::NotConnected);
        }

        self.state = ClientState::Reading;
        let outcome = self.exchange_fc03(address, count).await;
        match self.connection.take() {
            Some(conn) if conn.is_desynced() => {
                warn!("Dropping connection to {} after partial frame", conn.peer());
                conn.shutdown().await;
                self.state = ClientState::Disconnected;
            },
            conn => {
                self.connection = conn;
                self.state = ClientState::Connected;
            },
        }

        outcome.map_err(|e| match e {
            GxLinkError::ModbusException { .. } | GxLinkError::NotConnected => e,
            other => GxLinkError::read(address, reason_of(other)),
        })
    }

    async fn exchange_fc03(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let request = ModbusPdu::read_holding_registers(address, count)?;
        let frame = self.frames.build_request(self.unit_id, &request);
        let conn = self.connection.as_mut().ok_or(GxLinkError::NotConnected)?;

        debug!(
            "FC03 unit={} addr={} count={} via {}",
            self.unit_id,
            address,
            count,
            conn.peer()
        );
        conn.send(&frame).await?;

        let len = loop {
            let len = conn.receive(&mut self.buffer, self.read_timeout).await?;
            if self.frames.is_stale(&self.buffer[..len]) {
                debug!("Discarding stale response");
                continue;
            }
            break len;
        };

        let response = self.frames.parse_response(&self.buffer[..len])?;
        if let Some(code) = response.exception_code() {
            return Err(GxLinkError::ModbusException {
                address,
                code,
                description: exception_description(code).to_string(),
            });
        }
        response.register_words(count)
    }

    /// Read and decode a single register
    pub async fn read_register(&mut self, def: &RegisterDefinition) -> Result<RegisterReadResult> {
        let words = self.read_raw_registers(def.address, def.word_count()).await?;
        Ok(decoded_result(def, &words))
    }

    /// Read every definition, batching adjacent registers.
    ///
    /// Returns one result per definition in the order given.
    pub async fn read_registers(
        &mut self,
        defs: &[RegisterDefinition],
    ) -> Result<Vec<RegisterReadResult>> {
        if self.connection.is_none() {
            return Err(GxLinkError::NotConnected);
        }

        let mut sorted: Vec<(usize, &RegisterDefinition)> = defs.iter().enumerate().collect();
        sorted.sort_by_key(|(_, def)| def.address);

        let mut results: Vec<Option<RegisterReadResult>> = vec![None; defs.len()];

        for batch in plan_batches(sorted) {
            let start = batch.start_address();
            let outcome = match batch.word_span() {
                Ok(span) => self.read_raw_registers(start, span).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(words) => {
                    for &(index, def) in batch.members() {
                        let offset = usize::from(def.address - start);
                        let count = usize::from(def.word_count());
                        let slice = words.get(offset..offset + count).unwrap_or_default();
                        results[index] = Some(decoded_result(def, slice));
                    }
                },
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "Batch at {} ({} registers) failed, reading individually: {}",
                        start,
                        batch.len(),
                        e
                    );
                    for &(index, def) in batch.members() {
                        let result = match self.read_register(def).await {
                            Ok(result) => result,
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => {
                                debug!("Register {} degraded: {}", def.address, e);
                                RegisterReadResult::read_error(def)
                            },
                        };
                        results[index] = Some(result);
                    }
                },
            }
        }

        Ok(results
            .into_iter()
            .zip(defs)
            .map(|(result, def)| result.unwrap_or_else(|| RegisterReadResult::read_error(def)))
            .collect())
    }

    /// Idempotent
    pub async fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.shutdown().await;
        }
        if self.state != ClientState::Closed {
            info!("Modbus client closed");
        }
        self.state = ClientState::Closed;
    }
}

impl Default for ModbusClient {
    fn default() -> Self {
        Self::new()
    }
}

fn decoded_result(def: &RegisterDefinition, words: &[u16]) -> RegisterReadResult {
    RegisterReadResult::new(def, RawValue::from_words(words), decode_value(words, def))
}

/// Inner message without the variant prefix
fn reason_of(err: GxLinkError) -> String {
    match err {
        GxLinkError::Connection(msg)
        | GxLinkError::Timeout(msg)
        | GxLinkError::InvalidData(msg)
        | GxLinkError::Mqtt(msg)
        | GxLinkError::Config(msg) => msg,
        GxLinkError::Read { reason, .. } => reason,
        other => other.to_string(),
    }
}

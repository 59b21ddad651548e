//! In-process Modbus TCP simulator for integration tests
//!
//! Serves FC03 from a sparse register map. Any undefined address inside a
//! requested span answers Illegal Data Address, matching how a GX device
//! rejects a whole batch.

#![allow(dead_code)]

pub mod broker;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_UNKNOWN_UNIT: u8 = 0x0B;
pub const EXCEPTION_ILLEGAL_ADDRESS: u8 = 0x02;

#[derive(Debug, Clone)]
pub struct RequestLog {
    pub unit_id: u8,
    pub address: u16,
    pub count: u16,
}

#[derive(Default)]
struct SimulatorState {
    registers: HashMap<u16, u16>,
    units: HashSet<u8>,
    /// Addresses answering with a specific exception when read
    faults: HashMap<u16, u8>,
    requests: Vec<RequestLog>,
}

#[derive(Clone, Default)]
pub struct ModbusSimulator {
    state: Arc<RwLock<SimulatorState>>,
    connections: Arc<AtomicUsize>,
}

impl ModbusSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only these unit ids answer; others get exception 11
    pub async fn with_units(self, units: &[u8]) -> Self {
        self.state.write().await.units = units.iter().copied().collect();
        self
    }

    pub async fn set_register(&self, address: u16, value: u16) {
        self.state.write().await.registers.insert(address, value);
    }

    pub async fn set_registers(&self, start: u16, values: &[u16]) {
        let mut state = self.state.write().await;
        for (offset, value) in values.iter().enumerate() {
            state.registers.insert(start + offset as u16, *value);
        }
    }

    pub async fn set_fault(&self, address: u16, exception_code: u8) {
        self.state.write().await.faults.insert(address, exception_code);
    }

    pub async fn requests(&self) -> Vec<RequestLog> {
        self.state.read().await.requests.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Bind an ephemeral port on localhost and serve in the background
    pub async fn start(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind simulator");
        let local_addr = listener.local_addr().expect("simulator address");
        info!("Modbus simulator listening on {}", local_addr);

        let sim = self.clone();
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                debug!("Simulator connection from {}", peer);
                sim.connections.fetch_add(1, Ordering::SeqCst);
                let sim = sim.clone();
                tokio::spawn(async move {
                    sim.handle_connection(stream).await;
                });
            }
        });

        local_addr
    }

    async fn handle_connection(&self, mut stream: TcpStream) {
        loop {
            let mut header = [0u8; 7];
            if stream.read_exact(&mut header).await.is_err() {
                break;
            }
            let transaction_id = u16::from_be_bytes([header[0], header[1]]);
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            let unit_id = header[6];

            let mut pdu = vec![0u8; length.saturating_sub(1)];
            if stream.read_exact(&mut pdu).await.is_err() {
                break;
            }

            let response = self.respond(transaction_id, unit_id, &pdu).await;
            if stream.write_all(&response).await.is_err() {
                break;
            }
        }
    }

    async fn respond(&self, tid: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
        let function_code = pdu.first().copied().unwrap_or(0);
        if function_code != 0x03 || pdu.len() < 5 {
            return build_exception(tid, unit_id, function_code, 0x01);
        }

        let start = u16::from_be_bytes([pdu[1], pdu[2]]);
        let count = u16::from_be_bytes([pdu[3], pdu[4]]);

        let mut state = self.state.write().await;
        state.requests.push(RequestLog {
            unit_id,
            address: start,
            count,
        });

        if !state.units.is_empty() && !state.units.contains(&unit_id) {
            return build_exception(tid, unit_id, function_code, EXCEPTION_UNKNOWN_UNIT);
        }

        let mut words = Vec::with_capacity(count as usize);
        for address in start..start.saturating_add(count) {
            if let Some(code) = state.faults.get(&address) {
                return build_exception(tid, unit_id, function_code, *code);
            }
            match state.registers.get(&address) {
                Some(value) => words.push(*value),
                None => {
                    return build_exception(tid, unit_id, function_code, EXCEPTION_ILLEGAL_ADDRESS)
                },
            }
        }

        let mut response = Vec::with_capacity(9 + words.len() * 2);
        response.extend_from_slice(&tid.to_be_bytes());
        response.extend_from_slice(&[0x00, 0x00]);
        response.extend_from_slice(&(3 + count * 2).to_be_bytes());
        response.push(unit_id);
        response.push(0x03);
        response.push((count * 2) as u8);
        for word in words {
            response.extend_from_slice(&word.to_be_bytes());
        }
        response
    }
}

fn build_exception(tid: u16, unit_id: u8, function_code: u8, exception_code: u8) -> Vec<u8> {
    let mut response = Vec::with_capacity(9);
    response.extend_from_slice(&tid.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x00]);
    response.extend_from_slice(&3u16.to_be_bytes());
    response.push(unit_id);
    response.push(function_code | 0x80);
    response.push(exception_code);
    response
}

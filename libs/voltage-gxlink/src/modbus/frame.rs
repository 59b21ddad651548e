//! Modbus TCP framing
//!
//! Builds MBAP frames around request PDUs and validates that a response
//! belongs to the request currently in flight.

use super::constants;
use super::pdu::ModbusPdu;
use crate::error::{GxLinkError, Result};
use tracing::debug;

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    /// Always 0 for Modbus
    pub protocol_id: u16,
    /// Byte count of unit id + PDU
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < constants::MBAP_HEADER_LEN + 1 {
            return Err(GxLinkError::invalid_data("TCP frame too short"));
        }
        Ok(Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        })
    }
}

/// The one request a connection has outstanding
#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    transaction_id: u16,
    function_code: u8,
    unit_id: u8,
}

/// Frame builder/validator for one connection
#[derive(Debug)]
pub struct FrameProcessor {
    next_transaction_id: u16,
    pending: Option<PendingRequest>,
}

impl FrameProcessor {
    pub fn new() -> Self {
        Self {
            next_transaction_id: 1,
            pending: None,
        }
    }

    /// Wraps from 0xFFFF to 0x0000
    pub fn next_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    /// MBAP header + unit id + PDU, registering the request as pending
    pub fn build_request(&mut self, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let transaction_id = self.next_transaction_id();
        let function_code = pdu.function_code().unwrap_or(0);
        self.pending = Some(PendingRequest {
            transaction_id,
            function_code,
            unit_id,
        });

        let length = (pdu.len() + 1) as u16;
        let mut frame = Vec::with_capacity(constants::mbap_frame_size(pdu.len()));
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(pdu.as_slice());

        debug!(
            "TX frame: tid={:04X} unit={} fc={:02X} pdu_len={}",
            transaction_id,
            unit_id,
            function_code,
            pdu.len()
        );
        frame
    }

    /// A well-formed frame answering an earlier request, e.g. one that
    /// arrived after its read timed out
    pub fn is_stale(&self, data: &[u8]) -> bool {
        match (MbapHeader::parse(data), self.pending) {
            (Ok(header), Some(pending)) => header.transaction_id != pending.transaction_id,
            _ => false,
        }
    }

    /// Validate a complete response frame and extract its PDU.
    ///
    /// Exception responses are returned as PDUs; the caller maps the code.
    pub fn parse_response(&mut self, data: &[u8]) -> Result<ModbusPdu> {
        let header = MbapHeader::parse(data)?;
        debug!(
            "RX frame: tid={:04X} proto={} len={} unit={}",
            header.transaction_id, header.protocol_id, header.length, header.unit_id
        );

        if header.protocol_id != 0 {
            return Err(GxLinkError::invalid_data(format!(
                "Invalid protocol ID: expected 0, got {}",
                header.protocol_id
            )));
        }

        let expected_len = constants::MBAP_HEADER_LEN + usize::from(header.length);
        if data.len() != expected_len {
            return Err(GxLinkError::invalid_data(format!(
                "Invalid TCP frame length: expected {}, got {}",
                expected_len,
                data.len()
            )));
        }

        let pending = self
            .pending
            .take()
            .ok_or_else(|| GxLinkError::invalid_data("Response without pending request"))?;

        if header.transaction_id != pending.transaction_id {
            return Err(GxLinkError::invalid_data(format!(
                "Transaction ID mismatch: expected {:04X}, got {:04X}",
                pending.transaction_id, header.transaction_id
            )));
        }
        if header.unit_id != pending.unit_id {
            return Err(GxLinkError::invalid_data(format!(
                "Unit ID mismatch: expected {}, got {}",
                pending.unit_id, header.unit_id
            )));
        }

        let pdu = ModbusPdu::from_slice(&data[constants::MBAP_HEADER_LEN + 1..])?;
        let response_fc = pdu
            .function_code()
            .map(|fc| fc & !constants::EXCEPTION_FLAG)
            .unwrap_or(0);
        if response_fc != pending.function_code {
            return Err(GxLinkError::invalid_data(format!(
                "Function code mismatch: expected {:02X}, got {:02X}",
                pending.function_code, response_fc
            )));
        }

        Ok(pdu)
    }
}

impl Default for FrameProcessor {
    fn default() -> Self {
        Self::new()
    }
}

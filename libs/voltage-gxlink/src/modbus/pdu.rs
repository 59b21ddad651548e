//! Modbus PDU
//!
//! Fixed-size stack buffer holding one function code plus its data.

use super::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, MAX_PDU_SIZE, MODBUS_MAX_READ_REGISTERS,
};
use crate::error::{GxLinkError, Result};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    #[inline]
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(GxLinkError::invalid_data(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// FC03 request for `count` words starting at `start`
    pub fn read_holding_registers(start: u16, count: u16) -> Result<Self> {
        if count == 0 || usize::from(count) > MODBUS_MAX_READ_REGISTERS {
            return Err(GxLinkError::invalid_data(format!(
                "Register count {count} out of range 1..={MODBUS_MAX_READ_REGISTERS}"
            )));
        }
        if u32::from(start) + u32::from(count) > 0x1_0000 {
            return Err(GxLinkError::invalid_data(format!(
                "Register span {start}+{count} exceeds the address space"
            )));
        }

        let mut pdu = Self::new();
        pdu.push(FC_READ_HOLDING_REGISTERS)?;
        pdu.push_u16(start)?;
        pdu.push_u16(count)?;
        Ok(pdu)
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(GxLinkError::invalid_data("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        for byte in value.to_be_bytes() {
            self.push(byte)?;
        }
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.as_slice().get(1).copied()
        } else {
            None
        }
    }

    /// Register words of a non-exception FC03 response.
    ///
    /// The byte count must match both the payload actually present and the
    /// number of words requested.
    pub fn register_words(&self, expected_count: u16) -> Result<Vec<u16>> {
        let data = self.as_slice();
        if data.len() < 2 {
            return Err(GxLinkError::invalid_data(format!(
                "FC03 response too short: {} bytes",
                data.len()
            )));
        }
        if data[0] != FC_READ_HOLDING_REGISTERS {
            return Err(GxLinkError::invalid_data(format!(
                "Unexpected function code 0x{:02X} in FC03 response",
                data[0]
            )));
        }

        let byte_count = usize::from(data[1]);
        let payload = &data[2..];
        if payload.len() < byte_count || byte_count % 2 != 0 {
            return Err(GxLinkError::invalid_data(format!(
                "FC03 byte count {} does not match payload of {} bytes",
                byte_count,
                payload.len()
            )));
        }
        if byte_count != usize::from(expected_count) * 2 {
            return Err(GxLinkError::invalid_data(format!(
                "FC03 returned {} words, expected {}",
                byte_count / 2,
                expected_count
            )));
        }

        let words: Vec<u16> = payload[..byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        debug!("FC03 words: {:?}", words);
        Ok(words)
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

//! Modbus protocol constants
//!
//! Frame limits follow the Modbus application protocol: a PDU never exceeds
//! 253 bytes, which bounds how many registers one FC03 response can carry.

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Transaction ID(2) + Protocol ID(2) + Length(2); the unit id is counted by
/// the length field
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Receive buffer, larger than the 260 byte theoretical maximum frame
pub const MODBUS_RESPONSE_BUFFER_SIZE: usize = 512;

// ============================================================================
// Function Codes
// ============================================================================

pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Set on the function code of every exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// FC03 response: 1 (fc) + 1 (byte count) + N * 2 <= 253
pub const MODBUS_MAX_READ_REGISTERS: usize = 125;

/// Largest word span the planner coalesces into one request
pub const MAX_BATCH_WORDS: u32 = 100;

// ============================================================================
// Timeouts
// ============================================================================

pub const DEFAULT_PORT: u16 = 502;

pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

pub const READ_TIMEOUT: Duration = Duration::from_millis(5000);

#[inline]
pub const fn mbap_frame_size(pdu_len: usize) -> usize {
    MBAP_HEADER_LEN + 1 + pdu_len
}

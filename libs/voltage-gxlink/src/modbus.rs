//! Modbus TCP acquisition engine
//!
//! Layers, bottom-up:
//! - [`pdu`]: fixed-capacity protocol data unit
//! - [`frame`]: MBAP framing and response validation
//! - [`connection`]: timed TCP transport
//! - [`codec`]: register word decoding and exception descriptions
//! - [`batch`]: zero-gap read planning
//! - [`client`]: the connection state machine callers use

pub mod batch;
pub mod client;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod frame;
pub mod pdu;

pub use batch::{plan_batches, RegisterBatch};
pub use client::{ClientState, ModbusClient};
pub use codec::{decode_numeric, decode_string, decode_value, is_disconnected, resolve_enum_label};

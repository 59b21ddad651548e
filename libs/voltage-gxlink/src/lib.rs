//! Voltage GX Link Library
//!
//! Acquisition of process data from GX energy-management gateways.
//!
//! # Architecture
//!
//! - **Registers**: catalog definitions and the uniform read result
//! - **Modbus**: register decoding, batch planning and the TCP client
//! - **MQTT**: topic resolution, message collection and discovery
//! - **Transport**: one read call selecting the engine from [`ConnectionParams`]
//!
//! Both engines return one [`RegisterReadResult`] per requested register, in
//! request order. Per-register problems are reported in-band as
//! `"Not available"` or `"Error reading register"`; only connection and
//! configuration failures are errors.

pub mod error;
pub mod modbus;
pub mod mqtt;
pub mod registers;
pub mod transport;

pub use error::{GxLinkError, Result};
pub use modbus::ModbusClient;
pub use mqtt::{DiscoveredService, MqttClient, MqttTimeouts};
pub use registers::{
    DataType, RawValue, ReadValue, RegisterCatalog, RegisterCategory, RegisterDefinition,
    RegisterReadResult, NOT_AVAILABLE, READ_ERROR,
};
pub use transport::{read_device_registers, ConnectionParams};

//! GX Link Error Types
//!
//! Error types shared by the Modbus and MQTT acquisition engines.

use thiserror::Error;

/// Result type for voltage-gxlink operations
pub type Result<T> = std::result::Result<T, GxLinkError>;

/// Acquisition errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GxLinkError {
    /// TCP or broker connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection attempt exceeded the connect timeout
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// Operation issued on a client that is not connected
    #[error("Not connected")]
    NotConnected,

    /// Device answered with a Modbus exception response
    #[error("Modbus error at address {address}: {description} (code {code})")]
    ModbusException {
        address: u16,
        code: u8,
        description: String,
    },

    /// Any other failure while reading a register span
    #[error("Modbus read error at address {address}: {reason}")]
    Read { address: u16, reason: String },

    /// MQTT client or broker failure
    #[error("MQTT error: {0}")]
    Mqtt(String),

    /// Discovery did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Missing or invalid parameters, invalid catalog
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed frame, payload or catalog document
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<serde_json::Error> for GxLinkError {
    fn from(err: serde_json::Error) -> Self {
        GxLinkError::InvalidData(format!("JSON error: {}", err))
    }
}

impl From<rumqttc::ClientError> for GxLinkError {
    fn from(err: rumqttc::ClientError) -> Self {
        GxLinkError::Mqtt(err.to_string())
    }
}

impl From<rumqttc::ConnectionError> for GxLinkError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        GxLinkError::Mqtt(err.to_string())
    }
}

// Helper methods for creating errors
impl GxLinkError {
    pub fn connection(msg: impl Into<String>) -> Self {
        GxLinkError::Connection(msg.into())
    }

    pub fn read(address: u16, reason: impl Into<String>) -> Self {
        GxLinkError::Read {
            address,
            reason: reason.into(),
        }
    }

    pub fn mqtt(msg: impl Into<String>) -> Self {
        GxLinkError::Mqtt(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        GxLinkError::Timeout(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        GxLinkError::Config(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        GxLinkError::InvalidData(msg.into())
    }

    /// Errors that end the whole call rather than a single register.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GxLinkError::Connection(_)
                | GxLinkError::ConnectTimeout(_)
                | GxLinkError::NotConnected
                | GxLinkError::Mqtt(_)
                | GxLinkError::Config(_)
        )
    }
}

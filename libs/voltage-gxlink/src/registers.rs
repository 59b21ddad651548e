//! Register catalog types
//!
//! Register definitions grouped into device categories, plus the uniform
//! read result shape returned by both transports.
//!
//! The catalog itself is external data. [`RegisterCatalog`] only parses the
//! JSON document and answers lookups; it never mutates what it loaded.

use crate::error::{GxLinkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Value reported when a register or topic holds no data.
pub const NOT_AVAILABLE: &str = "Not available";

/// Value reported when a register could not be read at all.
pub const READ_ERROR: &str = "Error reading register";

// ============================================================================
// Data types
// ============================================================================

/// Wire data type of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    String,
}

impl DataType {
    /// Number of 16-bit words occupied on the wire
    pub fn word_count(self) -> u16 {
        match self {
            DataType::Uint16 | DataType::Int16 => 1,
            DataType::Uint32 | DataType::Int32 => 2,
            DataType::Uint64 => 4,
            DataType::String => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Uint16 => "uint16",
            DataType::Int16 => "int16",
            DataType::Uint32 => "uint32",
            DataType::Int32 => "int32",
            DataType::Uint64 => "uint64",
            DataType::String => "string",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = GxLinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uint16" => Ok(DataType::Uint16),
            "int16" => Ok(DataType::Int16),
            "uint32" => Ok(DataType::Uint32),
            "int32" => Ok(DataType::Int32),
            "uint64" => Ok(DataType::Uint64),
            "string" => Ok(DataType::String),
            other => Err(GxLinkError::config(format!("Unknown data type: {other}"))),
        }
    }
}

// ============================================================================
// Definitions
// ============================================================================

fn default_scale_factor() -> f64 {
    1.0
}

/// A single register of a device category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDefinition {
    pub address: u16,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub data_type: DataType,
    /// Divisor applied to the decoded integer; 0 and 1 mean identity
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub writable: bool,
    /// Device path used to build MQTT topics, e.g. `/Dc/0/Voltage`
    #[serde(default)]
    pub dbus_path: String,
    /// Explicit word count, overrides the data type default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<BTreeMap<i64, String>>,
}

impl RegisterDefinition {
    /// Definition for an address that is not in any catalog.
    pub fn ad_hoc(address: u16, words: u16, data_type: DataType, scale_factor: f64) -> Self {
        Self {
            address,
            name: format!("register_{address}"),
            description: format!("Register at address {address}"),
            data_type,
            scale_factor,
            unit: String::new(),
            writable: false,
            dbus_path: String::new(),
            words: Some(words),
            enum_values: None,
        }
    }

    pub fn word_count(&self) -> u16 {
        self.words.unwrap_or_else(|| self.data_type.word_count())
    }

    /// First address past this register
    pub fn end_address(&self) -> u32 {
        u32::from(self.address) + u32::from(self.word_count())
    }
}

/// A device category, e.g. `com.victronenergy.battery`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCategory {
    pub service: String,
    #[serde(default)]
    pub description: String,
    pub default_unit_id: u8,
    #[serde(default)]
    pub registers: Vec<RegisterDefinition>,
}

impl RegisterCategory {
    /// Last dot-separated segment of the service name (`battery`)
    pub fn service_type(&self) -> &str {
        crate::mqtt::topic::service_type(&self.service)
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Immutable collection of register categories
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterCatalog {
    categories: Vec<RegisterCategory>,
}

impl RegisterCatalog {
    pub fn new(categories: Vec<RegisterCategory>) -> Result<Self> {
        for category in &categories {
            if category.service.trim().is_empty() {
                return Err(GxLinkError::config("Category with empty service name"));
            }
            if let Some(reg) = category.registers.iter().find(|r| r.name.trim().is_empty()) {
                return Err(GxLinkError::config(format!(
                    "Register at address {} in {} has no name",
                    reg.address, category.service
                )));
            }
        }
        Ok(Self { categories })
    }

    /// Parse a catalog document: a bare array of categories, or an object
    /// wrapping them under `categories`
    pub fn from_json_str(json: &str) -> Result<Self> {
        let invalid =
            |e: serde_json::Error| GxLinkError::config(format!("Invalid register catalog: {e}"));
        let document: serde_json::Value = serde_json::from_str(json).map_err(invalid)?;
        let categories = match document {
            serde_json::Value::Object(mut map) => map
                .remove("categories")
                .ok_or_else(|| GxLinkError::config("Register catalog has no categories"))?,
            other => other,
        };
        Self::new(serde_json::from_value(categories).map_err(invalid)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GxLinkError::config(format!(
                "Failed to read register catalog {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&content)
    }

    pub fn categories(&self) -> &[RegisterCategory] {
        &self.categories
    }

    /// Exact service name lookup
    pub fn find(&self, service: &str) -> Option<&RegisterCategory> {
        self.categories.iter().find(|c| c.service == service)
    }

    /// Case-insensitive substring match over service and description
    pub fn search(&self, term: &str) -> Vec<&RegisterCategory> {
        let term = term.to_lowercase();
        self.categories
            .iter()
            .filter(|c| {
                c.service.to_lowercase().contains(&term)
                    || c.description.to_lowercase().contains(&term)
            })
            .collect()
    }

    /// Exact match first, then the first search hit
    pub fn resolve(&self, term: &str) -> Option<&RegisterCategory> {
        self.find(term)
            .or_else(|| self.search(term).into_iter().next())
    }
}

// ============================================================================
// Read results
// ============================================================================

/// Value as it arrived on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Scalar(f64),
    Words(Vec<u16>),
}

impl RawValue {
    /// Single word collapses to a scalar, longer spans stay a sequence
    pub fn from_words(words: &[u16]) -> Self {
        match words {
            [single] => RawValue::Scalar(f64::from(*single)),
            _ => RawValue::Words(words.to_vec()),
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Scalar(v) => write!(f, "{v}"),
            RawValue::Words(words) => {
                let parts: Vec<String> = words.iter().map(u16::to_string).collect();
                write!(f, "[{}]", parts.join(","))
            },
        }
    }
}

/// Decoded value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadValue {
    Number(f64),
    Text(String),
}

impl ReadValue {
    pub fn not_available() -> Self {
        ReadValue::Text(NOT_AVAILABLE.to_string())
    }

    pub fn read_error() -> Self {
        ReadValue::Text(READ_ERROR.to_string())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ReadValue::Number(n) => Some(*n),
            ReadValue::Text(_) => None,
        }
    }

    pub fn is_not_available(&self) -> bool {
        matches!(self, ReadValue::Text(s) if s == NOT_AVAILABLE)
    }
}

impl fmt::Display for ReadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadValue::Number(n) => write!(f, "{n}"),
            ReadValue::Text(s) => f.write_str(s),
        }
    }
}

/// One register's outcome, identical in shape for both transports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterReadResult {
    pub name: String,
    pub description: String,
    pub raw_value: RawValue,
    pub value: ReadValue,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_label: Option<String>,
}

impl RegisterReadResult {
    /// Result carrying `value`, with the enum label resolved when applicable
    pub fn new(def: &RegisterDefinition, raw_value: RawValue, value: ReadValue) -> Self {
        let enum_label = crate::modbus::codec::resolve_enum_label(def, &value);
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            raw_value,
            value,
            unit: def.unit.clone(),
            enum_label,
        }
    }

    /// Degraded result for a register whose read failed
    pub fn read_error(def: &RegisterDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            raw_value: RawValue::Scalar(0.0),
            value: ReadValue::read_error(),
            unit: def.unit.clone(),
            enum_label: None,
        }
    }
}

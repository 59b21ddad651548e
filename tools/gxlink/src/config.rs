//! gxlink configuration
//!
//! Priority (highest to lowest):
//! 1. Command line flags
//! 2. Environment variables (`GXLINK_`, nested keys split on `__`)
//! 3. Config file (`--config`, else `gxlink.yaml` when present)
//! 4. Default values

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use voltage_gxlink::modbus::constants::DEFAULT_PORT as MODBUS_PORT;
use voltage_gxlink::mqtt::client::DEFAULT_PORT as MQTT_PORT;
use voltage_gxlink::{ConnectionParams, GxLinkError};

pub const DEFAULT_CONFIG_FILE: &str = "gxlink.yaml";
pub const ENV_PREFIX: &str = "GXLINK_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Modbus,
    Mqtt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GxLinkConfig {
    pub transport: TransportKind,
    /// GX device address; empty means not configured
    pub host: String,
    /// Register catalog (JSON)
    pub catalog: PathBuf,
    pub log_level: String,
    pub modbus: ModbusSettings,
    pub mqtt: MqttSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusSettings {
    pub port: u16,
    /// Falls back to the category's default unit id
    pub unit_id: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub port: u16,
    /// Discovered from the broker when absent
    pub portal_id: Option<String>,
    pub device_instance: Option<String>,
}

impl Default for GxLinkConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Modbus,
            host: String::new(),
            catalog: PathBuf::from("config/registers.json"),
            log_level: "info".to_string(),
            modbus: ModbusSettings::default(),
            mqtt: MqttSettings::default(),
        }
    }
}

impl Default for ModbusSettings {
    fn default() -> Self {
        Self {
            port: MODBUS_PORT,
            unit_id: None,
        }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            port: MQTT_PORT,
            portal_id: None,
            device_instance: None,
        }
    }
}

/// Flag values that override file and environment settings
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub transport: Option<TransportKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unit_id: Option<u8>,
    pub portal_id: Option<String>,
    pub device_instance: Option<String>,
    pub catalog: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl GxLinkConfig {
    /// Defaults, then the config file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.exists() => {
                bail!("Config file not found: {}", path.display())
            },
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(&file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Invalid configuration ({})", file.display()))
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(transport) = overrides.transport {
            self.transport = transport;
        }
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            match self.transport {
                TransportKind::Modbus => self.modbus.port = port,
                TransportKind::Mqtt => self.mqtt.port = port,
            }
        }
        if overrides.unit_id.is_some() {
            self.modbus.unit_id = overrides.unit_id;
        }
        if overrides.portal_id.is_some() {
            self.mqtt.portal_id = overrides.portal_id;
        }
        if overrides.device_instance.is_some() {
            self.mqtt.device_instance = overrides.device_instance;
        }
        if let Some(catalog) = overrides.catalog {
            self.catalog = catalog;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
    }

    pub fn require_host(&self) -> Result<&str, GxLinkError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(GxLinkError::config(
                "Host is required (--host, GXLINK_HOST or host in gxlink.yaml)",
            ));
        }
        Ok(host)
    }

    /// Fully resolved parameters for the active transport
    pub fn connection_params(&self, default_unit_id: u8) -> Result<ConnectionParams, GxLinkError> {
        let host = self.require_host()?.to_string();
        let params = match self.transport {
            TransportKind::Modbus => ConnectionParams::Modbus {
                host,
                port: self.modbus.port,
                unit_id: self.modbus.unit_id.unwrap_or(default_unit_id),
            },
            TransportKind::Mqtt => ConnectionParams::Mqtt {
                host,
                port: self.mqtt.port,
                portal_id: self.mqtt.portal_id.clone().unwrap_or_default(),
                device_instance: self.mqtt.device_instance.clone(),
            },
        };
        params.validate()?;
        Ok(params)
    }
}

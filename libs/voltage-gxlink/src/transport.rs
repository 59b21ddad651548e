//! Transport dispatch
//!
//! One read operation over either engine. Callers pass fully resolved
//! parameters; a connection is opened per call and always closed.

use crate::error::{GxLinkError, Result};
use crate::modbus::ModbusClient;
use crate::mqtt::MqttClient;
use crate::registers::{RegisterDefinition, RegisterReadResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Where and how to reach a GX device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ConnectionParams {
    Modbus {
        host: String,
        port: u16,
        #[serde(rename = "unitId")]
        unit_id: u8,
    },
    Mqtt {
        host: String,
        port: u16,
        #[serde(rename = "portalId")]
        portal_id: String,
        /// Without an instance the read matches any instance of the service
        #[serde(
            rename = "deviceInstance",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        device_instance: Option<String>,
    },
}

impl ConnectionParams {
    pub fn host(&self) -> &str {
        match self {
            ConnectionParams::Modbus { host, .. } | ConnectionParams::Mqtt { host, .. } => host,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            ConnectionParams::Modbus { port, .. } | ConnectionParams::Mqtt { port, .. } => *port,
        }
    }

    pub fn transport_name(&self) -> &'static str {
        match self {
            ConnectionParams::Modbus { .. } => "modbus",
            ConnectionParams::Mqtt { .. } => "mqtt",
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host().trim().is_empty() {
            return Err(GxLinkError::config("Host is required"));
        }
        if let ConnectionParams::Mqtt { portal_id, .. } = self {
            if portal_id.trim().is_empty() {
                return Err(GxLinkError::config("Portal ID is required for MQTT transport"));
            }
        }
        Ok(())
    }
}

/// Read all `defs` of `service` over the configured transport.
///
/// The result list has one entry per definition in the given order.
pub async fn read_device_registers(
    params: &ConnectionParams,
    service: &str,
    defs: &[RegisterDefinition],
) -> Result<Vec<RegisterReadResult>> {
    params.validate()?;
    info!(
        "Reading {} registers of {} via {} {}:{}",
        defs.len(),
        service,
        params.transport_name(),
        params.host(),
        params.port()
    );

    match params {
        ConnectionParams::Modbus {
            host,
            port,
            unit_id,
        } => {
            let mut client = ModbusClient::new();
            client.connect(host, *port).await?;
            client.set_unit_id(*unit_id);
            let outcome = client.read_registers(defs).await;
            client.close().await;
            outcome
        },
        ConnectionParams::Mqtt {
            host,
            port,
            portal_id,
            device_instance,
        } => {
            let mut client = MqttClient::connect(host, *port, portal_id.as_str()).await?;
            let outcome = match device_instance {
                Some(instance) => client.read_registers(service, instance, defs).await,
                None => {
                    debug!("No device instance, matching any {} instance", service);
                    client.read_registers_wildcard(service, defs).await
                },
            };
            client.close().await;
            outcome
        },
    }
}

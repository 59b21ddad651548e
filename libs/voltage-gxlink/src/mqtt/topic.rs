//! GX MQTT topic conventions
//!
//! Notifications: `N/<portalId>/<serviceType>/<deviceInstance>/<devicePath>`
//! Keepalive:     `R/<portalId>/keepalive`

use crate::registers::{RawValue, ReadValue, RegisterDefinition, RegisterReadResult};
use serde_json::Value;

/// Serial topic every GX device publishes; segment 1 is the portal id
pub const PORTAL_DISCOVERY_TOPIC: &str = "N/+/system/+/Serial";

/// Last dot-separated segment: `com.victronenergy.battery` -> `battery`
pub fn service_type(service: &str) -> &str {
    service.rsplit('.').next().unwrap_or(service)
}

pub fn build_topic(
    portal_id: &str,
    service_type: &str,
    device_instance: &str,
    device_path: &str,
) -> String {
    let separator = if device_path.starts_with('/') { "" } else { "/" };
    format!("N/{portal_id}/{service_type}/{device_instance}{separator}{device_path}")
}

pub fn keepalive_topic(portal_id: &str) -> String {
    format!("R/{portal_id}/keepalive")
}

/// Every instance of one service type
pub fn service_wildcard(portal_id: &str, service_type: &str) -> String {
    format!("N/{portal_id}/{service_type}/+/#")
}

/// Every service of one portal
pub fn portal_wildcard(portal_id: &str) -> String {
    format!("N/{portal_id}/+/+/#")
}

/// Components of a notification topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTopic<'a> {
    pub portal_id: &'a str,
    pub service_type: &'a str,
    pub device_instance: &'a str,
    /// Remaining segments with a leading `/`
    pub device_path: String,
}

impl<'a> NotificationTopic<'a> {
    /// `None` for topics with fewer than four segments
    pub fn parse(topic: &'a str) -> Option<Self> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 4 {
            return None;
        }
        Some(Self {
            portal_id: parts[1],
            service_type: parts[2],
            device_instance: parts[3],
            device_path: format!("/{}", parts[4..].join("/")),
        })
    }
}

/// The `value` field of a JSON payload.
///
/// Malformed JSON, a missing field and `null` all mean "no value".
pub fn parse_payload(payload: &[u8]) -> Option<Value> {
    let envelope: Value = serde_json::from_slice(payload).ok()?;
    match envelope.get("value") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.clone()),
    }
}

/// Result for a register from its MQTT value.
///
/// MQTT already carries engineering units, so no scale factor is applied.
pub fn value_to_result(def: &RegisterDefinition, value: Option<&Value>) -> RegisterReadResult {
    let zero = RawValue::Scalar(0.0);
    match value {
        None => RegisterReadResult::new(def, zero, ReadValue::not_available()),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(n) => RegisterReadResult::new(def, RawValue::Scalar(n), ReadValue::Number(n)),
            None => RegisterReadResult::new(def, zero, ReadValue::Text(n.to_string())),
        },
        Some(Value::String(s)) => RegisterReadResult::new(def, zero, ReadValue::Text(s.clone())),
        Some(other) => RegisterReadResult::new(def, zero, ReadValue::Text(other.to_string())),
    }
}

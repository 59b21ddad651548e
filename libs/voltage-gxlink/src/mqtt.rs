//! MQTT acquisition engine
//!
//! Reads register values from the notification topics a GX device mirrors
//! onto its broker, and discovers which services and portal it exposes.

pub mod client;
pub mod collector;
pub mod topic;

pub use client::{MqttClient, MqttTimeouts};
pub use collector::DiscoveredService;
pub use topic::{build_topic, keepalive_topic, parse_payload, service_type, value_to_result};

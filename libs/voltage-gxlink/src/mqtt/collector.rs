//! Message accumulation
//!
//! A collector is fed every publish seen while a read is in progress and
//! reports when it has everything it waits for. The client stops at
//! completion or at the deadline, whichever comes first.

use super::topic::{build_topic, parse_payload, value_to_result, NotificationTopic};
use crate::registers::{RegisterDefinition, RegisterReadResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Completion object driven by incoming publishes
pub trait TopicCollector {
    fn accept(&mut self, topic: &str, payload: &[u8]);

    fn is_complete(&self) -> bool;
}

// ============================================================================
// Exact topics
// ============================================================================

/// Waits for one message on each expected topic.
///
/// A repeated publish replaces the stored value; completion counts distinct
/// topics, so repeats never complete the read early.
#[derive(Debug)]
pub struct ExactTopicCollector {
    topics: Vec<String>,
    expected: HashSet<String>,
    received: HashMap<String, Option<Value>>,
}

impl ExactTopicCollector {
    pub fn new(
        portal_id: &str,
        service_type: &str,
        device_instance: &str,
        defs: &[RegisterDefinition],
    ) -> Self {
        let topics: Vec<String> = defs
            .iter()
            .map(|def| build_topic(portal_id, service_type, device_instance, &def.dbus_path))
            .collect();
        let expected = topics.iter().cloned().collect();
        Self {
            topics,
            expected,
            received: HashMap::new(),
        }
    }

    /// Distinct topics to subscribe to
    pub fn subscriptions(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.topics
            .iter()
            .filter(|t| seen.insert(*t))
            .cloned()
            .collect()
    }

    /// One result per definition, in definition order
    pub fn into_results(self, defs: &[RegisterDefinition]) -> Vec<RegisterReadResult> {
        defs.iter()
            .zip(&self.topics)
            .map(|(def, topic)| {
                let value = self.received.get(topic).and_then(Option::as_ref);
                value_to_result(def, value)
            })
            .collect()
    }
}

impl TopicCollector for ExactTopicCollector {
    fn accept(&mut self, topic: &str, payload: &[u8]) {
        if self.expected.contains(topic) {
            self.received.insert(topic.to_string(), parse_payload(payload));
        }
    }

    fn is_complete(&self) -> bool {
        self.received.len() >= self.expected.len()
    }
}

// ============================================================================
// Device paths across instances
// ============================================================================

/// Matches messages by device path regardless of instance; first value wins
#[derive(Debug)]
pub struct DevicePathCollector {
    expected: HashSet<String>,
    received: HashMap<String, Option<Value>>,
}

impl DevicePathCollector {
    pub fn new(defs: &[RegisterDefinition]) -> Self {
        Self {
            expected: defs.iter().map(|d| normalize_path(&d.dbus_path)).collect(),
            received: HashMap::new(),
        }
    }

    pub fn into_results(self, defs: &[RegisterDefinition]) -> Vec<RegisterReadResult> {
        defs.iter()
            .map(|def| {
                let value = self
                    .received
                    .get(&normalize_path(&def.dbus_path))
                    .and_then(Option::as_ref);
                value_to_result(def, value)
            })
            .collect()
    }
}

impl TopicCollector for DevicePathCollector {
    fn accept(&mut self, topic: &str, payload: &[u8]) {
        let Some(parsed) = NotificationTopic::parse(topic) else {
            return;
        };
        if self.expected.contains(&parsed.device_path)
            && !self.received.contains_key(&parsed.device_path)
        {
            self.received.insert(parsed.device_path, parse_payload(payload));
        }
    }

    fn is_complete(&self) -> bool {
        self.received.len() >= self.expected.len()
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

// ============================================================================
// Service inventory
// ============================================================================

/// A service instance seen on the broker
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredService {
    pub service_type: String,
    pub device_instance: String,
}

/// Records every (service type, instance) pair; only the deadline ends it
#[derive(Debug, Default)]
pub struct ServiceInventory {
    services: BTreeSet<DiscoveredService>,
}

impl ServiceInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted by service type, then instance
    pub fn into_services(self) -> Vec<DiscoveredService> {
        self.services.into_iter().collect()
    }
}

impl TopicCollector for ServiceInventory {
    fn accept(&mut self, topic: &str, _payload: &[u8]) {
        if let Some(parsed) = NotificationTopic::parse(topic) {
            self.services.insert(DiscoveredService {
                service_type: parsed.service_type.to_string(),
                device_instance: parsed.device_instance.to_string(),
            });
        }
    }

    fn is_complete(&self) -> bool {
        false
    }
}

// ============================================================================
// Portal id
// ============================================================================

/// Takes the portal id from the first matching topic
#[derive(Debug, Default)]
pub struct PortalIdCollector {
    portal_id: Option<String>,
}

impl PortalIdCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_portal_id(self) -> Option<String> {
        self.portal_id
    }
}

impl TopicCollector for PortalIdCollector {
    fn accept(&mut self, topic: &str, _payload: &[u8]) {
        if self.portal_id.is_some() {
            return;
        }
        let mut parts = topic.split('/');
        if let (Some(_), Some(portal_id)) = (parts.next(), parts.next()) {
            if !portal_id.is_empty() {
                self.portal_id = Some(portal_id.to_string());
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.portal_id.is_some()
    }
}

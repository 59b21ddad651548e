//! MQTT client against the in-process broker stub

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod support;

use std::time::{Duration, Instant};
use support::broker::{topic_matches, MqttBroker};
use voltage_gxlink::{
    read_device_registers, ConnectionParams, DataType, DiscoveredService, MqttClient,
    MqttTimeouts, ReadValue, RegisterDefinition, NOT_AVAILABLE,
};

const PORTAL: &str = "c0619ab1cafe";
const BATTERY: &str = "com.victronenergy.battery";

fn reg(address: u16, name: &str, scale_factor: f64, dbus_path: &str) -> RegisterDefinition {
    RegisterDefinition {
        address,
        name: name.to_string(),
        description: format!("{name} register"),
        data_type: DataType::Uint16,
        scale_factor,
        unit: String::new(),
        writable: false,
        dbus_path: dbus_path.to_string(),
        words: None,
        enum_values: None,
    }
}

fn battery_defs() -> Vec<RegisterDefinition> {
    vec![
        reg(259, "Voltage", 100.0, "/Dc/0/Voltage"),
        reg(266, "Soc", 10.0, "/Soc"),
    ]
}

async fn battery_broker() -> MqttBroker {
    let broker = MqttBroker::new();
    broker
        .retain(&format!("N/{PORTAL}/battery/512/Dc/0/Voltage"), "52.31")
        .await;
    broker.retain(&format!("N/{PORTAL}/battery/512/Soc"), "87.5").await;
    broker
        .retain(&format!("N/{PORTAL}/solarcharger/279/Dc/0/Voltage"), "52.1")
        .await;
    broker
        .retain(&format!("N/{PORTAL}/system/0/Serial"), r#""c0619ab1cafe""#)
        .await;
    broker
}

fn short_window() -> MqttTimeouts {
    MqttTimeouts {
        read: Duration::from_millis(300),
        ..MqttTimeouts::default()
    }
}

fn exact_topics() -> Vec<String> {
    vec![
        format!("N/{PORTAL}/battery/512/Dc/0/Voltage"),
        format!("N/{PORTAL}/battery/512/Soc"),
    ]
}

// ============================================================================
// Exact-topic reads
// ============================================================================

#[tokio::test]
async fn test_exact_read_full_cycle() {
    let broker = battery_broker().await;
    let addr = broker.start().await;

    let mut client = MqttClient::connect("127.0.0.1", addr.port(), PORTAL)
        .await
        .unwrap();
    let results = client
        .read_registers(BATTERY, "512", &battery_defs())
        .await
        .unwrap();
    client.close().await;
    drop(client);
    broker.sessions_closed(1).await;

    // Values arrive in engineering units; no rescaling
    assert_eq!(results[0].name, "Voltage");
    assert_eq!(results[0].value, ReadValue::Number(52.31));
    assert_eq!(results[1].value, ReadValue::Number(87.5));

    let log = broker.log().await;
    assert_eq!(log.subscribes, exact_topics());
    assert_eq!(log.publishes, vec![format!("R/{PORTAL}/keepalive")]);
    assert_eq!(log.unsubscribes, log.subscribes);
}

#[tokio::test]
async fn test_unanswered_topic_is_not_available() {
    let broker = battery_broker().await;
    let addr = broker.start().await;

    let mut defs = battery_defs();
    defs.push(reg(303, "TimeToGo", 0.01, "/TimeToGo"));

    let mut client =
        MqttClient::connect_with_timeouts("127.0.0.1", addr.port(), PORTAL, short_window())
            .await
            .unwrap();
    let started = Instant::now();
    let results = client.read_registers(BATTERY, "512", &defs).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));
    client.close().await;
    drop(client);
    broker.sessions_closed(1).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].value, ReadValue::Number(52.31));
    assert_eq!(results[1].value, ReadValue::Number(87.5));
    assert_eq!(results[2].value.to_string(), NOT_AVAILABLE);

    // Released even though the read ran into its deadline
    let log = broker.log().await;
    assert_eq!(log.subscribes.len(), 3);
    assert_eq!(log.unsubscribes, log.subscribes);
}

#[tokio::test]
async fn test_wildcard_read_subscribes_service_filter() {
    let broker = battery_broker().await;
    let addr = broker.start().await;

    let mut client = MqttClient::connect("127.0.0.1", addr.port(), PORTAL)
        .await
        .unwrap();
    let results = client
        .read_registers_wildcard(BATTERY, &battery_defs())
        .await
        .unwrap();
    client.close().await;
    drop(client);
    broker.sessions_closed(1).await;

    assert_eq!(results[0].value, ReadValue::Number(52.31));
    assert_eq!(results[1].value, ReadValue::Number(87.5));

    let log = broker.log().await;
    assert_eq!(log.subscribes, vec![format!("N/{PORTAL}/battery/+/#")]);
    assert_eq!(log.publishes, vec![format!("R/{PORTAL}/keepalive")]);
    assert_eq!(log.unsubscribes, log.subscribes);
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_discover_services() {
    let broker = battery_broker().await;
    let addr = broker.start().await;

    let mut client =
        MqttClient::connect_with_timeouts("127.0.0.1", addr.port(), PORTAL, short_window())
            .await
            .unwrap();
    let services = client.discover_services().await.unwrap();
    client.close().await;

    let service = |service_type: &str, device_instance: &str| DiscoveredService {
        service_type: service_type.to_string(),
        device_instance: device_instance.to_string(),
    };
    assert_eq!(
        services,
        vec![
            service("battery", "512"),
            service("solarcharger", "279"),
            service("system", "0"),
        ]
    );
}

#[tokio::test]
async fn test_discover_portal_id_without_keepalive() {
    let broker = battery_broker().await;
    let addr = broker.start().await;

    let portal_id =
        MqttClient::discover_portal_id_with_timeouts("127.0.0.1", addr.port(), short_window())
            .await
            .unwrap();
    assert_eq!(portal_id, PORTAL);

    broker.sessions_closed(1).await;
    let log = broker.log().await;
    assert_eq!(log.subscribes, vec!["N/+/system/+/Serial".to_string()]);
    assert!(log.publishes.is_empty());
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_dispatch_with_instance_reads_exact_topics() {
    let broker = battery_broker().await;
    let addr = broker.start().await;

    let params = ConnectionParams::Mqtt {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        portal_id: PORTAL.to_string(),
        device_instance: Some("512".to_string()),
    };
    let results = read_device_registers(&params, BATTERY, &battery_defs())
        .await
        .unwrap();
    broker.sessions_closed(1).await;

    assert_eq!(results[1].value, ReadValue::Number(87.5));
    assert_eq!(broker.log().await.subscribes, exact_topics());
}

#[tokio::test]
async fn test_dispatch_without_instance_reads_wildcard() {
    let broker = battery_broker().await;
    let addr = broker.start().await;

    let params = ConnectionParams::Mqtt {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        portal_id: PORTAL.to_string(),
        device_instance: None,
    };
    let results = read_device_registers(&params, BATTERY, &battery_defs())
        .await
        .unwrap();
    broker.sessions_closed(1).await;

    assert_eq!(results[0].value, ReadValue::Number(52.31));
    assert_eq!(
        broker.log().await.subscribes,
        vec![format!("N/{PORTAL}/battery/+/#")]
    );
}

#[test]
fn test_stub_filter_matching() {
    assert!(topic_matches("N/+/system/+/Serial", "N/abc/system/0/Serial"));
    assert!(topic_matches("N/abc/battery/+/#", "N/abc/battery/512/Dc/0/Voltage"));
    assert!(!topic_matches("N/abc/battery/+/#", "N/abc/solarcharger/279/Soc"));
    assert!(!topic_matches("N/abc/battery/512/Soc", "N/abc/battery/512/Soc/Extra"));
}

//! MQTT client for GX notification topics
//!
//! The rumqttc event loop is polled inline by whichever operation is
//! running, so a read is one task: queue subscriptions and a keepalive, then
//! poll until the collector completes or the deadline passes.

use super::collector::{
    DevicePathCollector, DiscoveredService, ExactTopicCollector, PortalIdCollector,
    ServiceInventory, TopicCollector,
};
use super::topic::{
    keepalive_topic, portal_wildcard, service_type, service_wildcard, PORTAL_DISCOVERY_TOPIC,
};
use crate::error::{GxLinkError, Result};
use crate::registers::{RegisterDefinition, RegisterReadResult};
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    QoS,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 1883;

/// Request queue between the client handle and the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 64;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

static CLIENT_SEQ: AtomicU32 = AtomicU32::new(0);

/// Timing for one MQTT session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqttTimeouts {
    pub connect: Duration,
    /// Collection window for reads and discovery
    pub read: Duration,
    pub keep_alive: Duration,
}

impl Default for MqttTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(5000),
            read: Duration::from_millis(8000),
            keep_alive: Duration::from_secs(30),
        }
    }
}

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    portal_id: String,
    broker: String,
    timeouts: MqttTimeouts,
    closed: bool,
}

impl std::fmt::Debug for MqttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttClient")
            .field("broker", &self.broker)
            .field("portal_id", &self.portal_id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl MqttClient {
    pub async fn connect(host: &str, port: u16, portal_id: impl Into<String>) -> Result<Self> {
        Self::connect_with_timeouts(host, port, portal_id, MqttTimeouts::default()).await
    }

    /// Connect and wait for the broker's CONNACK within the connect timeout
    pub async fn connect_with_timeouts(
        host: &str,
        port: u16,
        portal_id: impl Into<String>,
        timeouts: MqttTimeouts,
    ) -> Result<Self> {
        let client_id = format!(
            "gxlink-{}-{}",
            std::process::id(),
            CLIENT_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(timeouts.keep_alive);
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let broker = format!("{host}:{port}");
        debug!("MQTT connecting: {}", broker);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(GxLinkError::connection(format!(
                                "Broker {broker} refused connection: {:?}",
                                ack.code
                            )))
                        };
                    },
                    Ok(_) => continue,
                    Err(e) => {
                        return Err(GxLinkError::connection(format!(
                            "Failed to connect to {broker}: {e}"
                        )))
                    },
                }
            }
        };

        match timeout(timeouts.connect, handshake).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!("MQTT timeout: {}", broker);
                return Err(GxLinkError::ConnectTimeout(broker));
            },
        }

        info!("MQTT connected: {}", broker);
        Ok(Self {
            client,
            eventloop,
            portal_id: portal_id.into(),
            broker,
            timeouts,
            closed: false,
        })
    }

    pub fn portal_id(&self) -> &str {
        &self.portal_id
    }

    /// Read registers of one known device instance
    pub async fn read_registers(
        &mut self,
        service: &str,
        device_instance: &str,
        defs: &[RegisterDefinition],
    ) -> Result<Vec<RegisterReadResult>> {
        self.require_portal_id()?;
        if defs.is_empty() {
            return Ok(Vec::new());
        }

        let mut collector =
            ExactTopicCollector::new(&self.portal_id, service_type(service), device_instance, defs);
        let topics = collector.subscriptions();

        let outcome = self.run(&topics, &mut collector).await;
        self.release(&topics).await;
        outcome?;

        Ok(collector.into_results(defs))
    }

    /// Read registers from whichever instance of the service publishes first
    pub async fn read_registers_wildcard(
        &mut self,
        service: &str,
        defs: &[RegisterDefinition],
    ) -> Result<Vec<RegisterReadResult>> {
        self.require_portal_id()?;
        if defs.is_empty() {
            return Ok(Vec::new());
        }

        let topics = vec![service_wildcard(&self.portal_id, service_type(service))];
        let mut collector = DevicePathCollector::new(defs);

        let outcome = self.run(&topics, &mut collector).await;
        self.release(&topics).await;
        outcome?;

        Ok(collector.into_results(defs))
    }

    /// Every (service type, instance) publishing within the read window
    pub async fn discover_services(&mut self) -> Result<Vec<DiscoveredService>> {
        self.require_portal_id()?;

        let topics = vec![portal_wildcard(&self.portal_id)];
        let mut inventory = ServiceInventory::new();

        let outcome = self.run(&topics, &mut inventory).await;
        self.release(&topics).await;
        outcome?;

        let services = inventory.into_services();
        info!("Discovered {} services on {}", services.len(), self.broker);
        Ok(services)
    }

    /// Portal id of the GX device behind a broker
    pub async fn discover_portal_id(host: &str, port: u16) -> Result<String> {
        Self::discover_portal_id_with_timeouts(host, port, MqttTimeouts::default()).await
    }

    pub async fn discover_portal_id_with_timeouts(
        host: &str,
        port: u16,
        timeouts: MqttTimeouts,
    ) -> Result<String> {
        let mut client = Self::connect_with_timeouts(host, port, String::new(), timeouts).await?;

        let topics = vec![PORTAL_DISCOVERY_TOPIC.to_string()];
        let mut collector = PortalIdCollector::new();

        let outcome = async {
            client.subscribe(&topics).await?;
            client.collect(&mut collector).await
        }
        .await;
        client.release(&topics).await;
        client.close().await;
        outcome?;

        collector.into_portal_id().ok_or_else(|| {
            GxLinkError::timeout("Portal ID discovery timeout, no MQTT data received")
        })
    }

    /// Idempotent
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.enqueue(|c| c.try_disconnect()).await {
            debug!("MQTT disconnect request: {}", e);
            return;
        }

        // Flush queued requests up to and including the DISCONNECT
        let deadline = Instant::now() + DISCONNECT_TIMEOUT;
        loop {
            match timeout_at(deadline, self.eventloop.poll()).await {
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) | Ok(Err(_)) | Err(_) => break,
                Ok(Ok(_)) => continue,
            }
        }
        info!("MQTT closed: {}", self.broker);
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require_portal_id(&self) -> Result<()> {
        if self.portal_id.trim().is_empty() {
            return Err(GxLinkError::config("MQTT portal id is required"));
        }
        if self.closed {
            return Err(GxLinkError::NotConnected);
        }
        Ok(())
    }

    /// Subscribe, wake the device with a keepalive, then collect
    async fn run<C: TopicCollector>(&mut self, topics: &[String], collector: &mut C) -> Result<()> {
        self.subscribe(topics).await?;

        let keepalive = keepalive_topic(&self.portal_id);
        self.enqueue(|c| c.try_publish(keepalive.clone(), QoS::AtMostOnce, false, Vec::<u8>::new()))
            .await?;
        debug!("MQTT keepalive: {}", keepalive);

        self.collect(collector).await
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        for topic in topics {
            self.enqueue(|c| c.try_subscribe(topic.clone(), QoS::AtMostOnce))
                .await?;
        }
        debug!("MQTT subscribed: {} topics", topics.len());
        Ok(())
    }

    /// Poll until the collector is satisfied or the read window closes
    async fn collect<C: TopicCollector>(&mut self, collector: &mut C) -> Result<()> {
        let deadline = Instant::now() + self.timeouts.read;
        let mut messages = 0usize;

        while !collector.is_complete() {
            match timeout_at(deadline, self.eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    messages += 1;
                    collector.accept(&publish.topic, &publish.payload);
                },
                Ok(Ok(_)) => {},
                Ok(Err(e)) => return Err(GxLinkError::mqtt(e.to_string())),
                Err(_) => {
                    debug!("MQTT read window elapsed after {} messages", messages);
                    return Ok(());
                },
            }
        }

        debug!("MQTT collection complete after {} messages", messages);
        Ok(())
    }

    /// Queue unsubscribes; they are flushed by the next poll
    async fn release(&mut self, topics: &[String]) {
        for topic in topics {
            if let Err(e) = self.enqueue(|c| c.try_unsubscribe(topic.clone())).await {
                debug!("MQTT unsubscribe {}: {}", topic, e);
                return;
            }
        }
    }

    /// Queue a request, polling the event loop while the queue is full
    async fn enqueue<F>(&mut self, mut request: F) -> Result<()>
    where
        F: FnMut(&AsyncClient) -> std::result::Result<(), ClientError>,
    {
        loop {
            match request(&self.client) {
                Ok(()) => return Ok(()),
                Err(ClientError::TryRequest(_)) => {
                    match timeout(self.timeouts.read, self.eventloop.poll()).await {
                        Ok(Ok(_)) => {},
                        Ok(Err(e)) => return Err(e.into()),
                        Err(_) => return Err(GxLinkError::mqtt("Request queue stalled")),
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }
}

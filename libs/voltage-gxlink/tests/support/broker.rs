//! In-process MQTT 3.1.1 broker stub for integration tests
//!
//! Holds a set of retained messages. Every SUBSCRIBE is acknowledged and
//! answered with the retained messages its filter matches; UNSUBSCRIBE and
//! PINGREQ are acknowledged. SUBSCRIBE, PUBLISH and UNSUBSCRIBE topics are
//! logged per broker.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::debug;

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const SUBSCRIBE: u8 = 8;
const UNSUBSCRIBE: u8 = 10;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

#[derive(Debug, Clone, Default)]
pub struct BrokerLog {
    pub subscribes: Vec<String>,
    pub publishes: Vec<String>,
    pub unsubscribes: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MqttBroker {
    retained: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    log: Arc<RwLock<BrokerLog>>,
    closed_sessions: Arc<AtomicUsize>,
}

impl MqttBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain `{"value": <json>}` on `topic`
    pub async fn retain(&self, topic: &str, value_json: &str) {
        let payload = format!(r#"{{"value": {value_json}}}"#).into_bytes();
        self.retained.write().await.insert(topic.to_string(), payload);
    }

    pub async fn log(&self) -> BrokerLog {
        self.log.read().await.clone()
    }

    /// Wait until `count` client sessions have ended
    pub async fn sessions_closed(&self, count: usize) {
        let wait = async {
            while self.closed_sessions.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(3), wait).await.is_err() {
            panic!("broker sessions still open");
        }
    }

    pub async fn start(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind broker");
        let local_addr = listener.local_addr().expect("broker address");

        let broker = self.clone();
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                debug!("Broker connection from {}", peer);
                let broker = broker.clone();
                tokio::spawn(async move {
                    broker.handle_session(stream).await;
                    broker.closed_sessions.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        local_addr
    }

    async fn handle_session(&self, mut stream: TcpStream) {
        while let Some((packet_type, flags, body)) = read_packet(&mut stream).await {
            let reply = match packet_type {
                CONNECT => vec![0x20, 0x02, 0x00, 0x00],
                SUBSCRIBE => self.on_subscribe(&body).await,
                UNSUBSCRIBE => self.on_unsubscribe(&body).await,
                PUBLISH => {
                    self.on_publish(flags, &body).await;
                    Vec::new()
                },
                PINGREQ => vec![0xD0, 0x00],
                DISCONNECT => break,
                _ => Vec::new(),
            };
            if !reply.is_empty() && stream.write_all(&reply).await.is_err() {
                break;
            }
        }
    }

    async fn on_subscribe(&self, body: &[u8]) -> Vec<u8> {
        let (packet_id, mut rest) = body.split_at(2);
        let mut filters = Vec::new();
        while let Some((filter, tail)) = read_string(rest) {
            filters.push(filter);
            // Requested QoS byte
            rest = tail.get(1..).unwrap_or_default();
        }

        let mut reply = vec![0x90];
        encode_remaining_length(&mut reply, 2 + filters.len());
        reply.extend_from_slice(packet_id);
        reply.extend(std::iter::repeat(0x00).take(filters.len()));

        let retained = self.retained.read().await;
        for filter in &filters {
            for (topic, payload) in retained.iter() {
                if topic_matches(filter, topic) {
                    reply.extend(retained_publish(topic, payload));
                }
            }
        }

        self.log.write().await.subscribes.extend(filters);
        reply
    }

    async fn on_unsubscribe(&self, body: &[u8]) -> Vec<u8> {
        let (packet_id, mut rest) = body.split_at(2);
        let mut log = self.log.write().await;
        while let Some((filter, tail)) = read_string(rest) {
            log.unsubscribes.push(filter);
            rest = tail;
        }
        vec![0xB0, 0x02, packet_id[0], packet_id[1]]
    }

    async fn on_publish(&self, flags: u8, body: &[u8]) {
        if let Some((topic, _)) = read_string(body) {
            debug!("Broker publish {} (flags {:#x})", topic, flags);
            self.log.write().await.publishes.push(topic);
        }
    }
}

async fn read_packet(stream: &mut TcpStream) -> Option<(u8, u8, Vec<u8>)> {
    let first = stream.read_u8().await.ok()?;
    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        length |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.ok()?;
    Some((first >> 4, first & 0x0F, body))
}

fn read_string(data: &[u8]) -> Option<(String, &[u8])> {
    let len = usize::from(u16::from_be_bytes([*data.first()?, *data.get(1)?]));
    let text = data.get(2..2 + len)?;
    Some((String::from_utf8_lossy(text).into_owned(), &data[2 + len..]))
}

fn encode_remaining_length(out: &mut Vec<u8>, mut length: usize) {
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if length == 0 {
            break;
        }
    }
}

fn retained_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    // QoS 0, retain flag set
    let mut packet = vec![0x31];
    encode_remaining_length(&mut packet, 2 + topic.len() + payload.len());
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// `+` matches one level, a trailing `#` matches the rest
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            },
            exact => {
                if levels.next() != Some(exact) {
                    return false;
                }
            },
        }
    }
    levels.next().is_none()
}

// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fakes shared by the unit tests of this crate.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::QoS;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::broker::{BrokerClient, BrokerError};
use crate::sink::{EventSink, LiveEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Subscribe(String),
    SubscribeMany(Vec<String>),
    Unsubscribe(String),
    Publish {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
        qos: QoS,
    },
}

/// Records every request; optionally fails all of them.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    calls: Mutex<Vec<BrokerCall>>,
    failing: AtomicBool,
}

impl RecordingBroker {
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, call: BrokerCall) -> Result<(), BrokerError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.load(Ordering::SeqCst) {
            Err(BrokerError::NotConnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerClient for RecordingBroker {
    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), BrokerError> {
        self.record(BrokerCall::Subscribe(topic.to_string()))
    }

    async fn subscribe_many(&self, topics: &[String], _qos: QoS) -> Result<(), BrokerError> {
        self.record(BrokerCall::SubscribeMany(topics.to_vec()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.record(BrokerCall::Unsubscribe(topic.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
        qos: QoS,
    ) -> Result<(), BrokerError> {
        self.record(BrokerCall::Publish {
            topic: topic.to_string(),
            payload,
            retain,
            qos,
        })
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LiveEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<LiveEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: LiveEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Packets the mock broker received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedPacket {
    Connect,
    Subscribe(Vec<String>),
    Publish { topic: String, payload: Vec<u8> },
    Disconnect,
}

enum Control {
    Publish {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    DropConnection,
}

/// Minimal MQTT 3.1.1 broker on a local port, one client connection at a
/// time. Acknowledges everything and lets tests push QoS 0 publishes or cut
/// the connection.
pub struct MockBroker {
    pub port: u16,
    received: mpsc::UnboundedReceiver<ReceivedPacket>,
    control: mpsc::UnboundedSender<Control>,
    server: JoinHandle<()>,
}

impl MockBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (control, mut control_rx) = mpsc::unbounded_channel();

        let server = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (read_half, mut write_half) = stream.into_split();
                let (packets_tx, mut packets) = mpsc::unbounded_channel();
                let reader = tokio::spawn(read_packets(read_half, packets_tx));

                loop {
                    tokio::select! {
                        packet = packets.recv() => {
                            let Some((header, body)) = packet else { break };
                            let (reply, seen) = respond(header, &body);
                            if let Some(seen) = seen {
                                let _ = received_tx.send(seen);
                            }
                            if !reply.is_empty() && write_half.write_all(&reply).await.is_err() {
                                break;
                            }
                        }
                        control = control_rx.recv() => match control {
                            Some(Control::Publish { topic, payload, retain }) => {
                                let packet = encode_publish(&topic, &payload, retain);
                                if write_half.write_all(&packet).await.is_err() {
                                    break;
                                }
                            }
                            Some(Control::DropConnection) | None => break,
                        },
                    }
                }
                reader.abort();
            }
        });

        Self {
            port,
            received,
            control,
            server,
        }
    }

    pub fn publish(&self, topic: &str, payload: &str, retain: bool) {
        let _ = self.control.send(Control::Publish {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
            retain,
        });
    }

    pub fn drop_connection(&self) {
        let _ = self.control.send(Control::DropConnection);
    }

    /// Next packet matching `wanted`, skipping others. None after 5s.
    pub async fn next_matching<T>(
        &mut self,
        mut wanted: impl FnMut(ReceivedPacket) -> Option<T>,
    ) -> Option<T> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let packet = tokio::time::timeout_at(deadline, self.received.recv())
                .await
                .ok()??;
            if let Some(found) = wanted(packet) {
                return Some(found);
            }
        }
    }

    pub async fn next_subscribe(&mut self) -> Option<Vec<String>> {
        self.next_matching(|packet| match packet {
            ReceivedPacket::Subscribe(filters) => Some(filters),
            _ => None,
        })
        .await
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn read_packets(
    mut stream: OwnedReadHalf,
    packets: mpsc::UnboundedSender<(u8, Vec<u8>)>,
) -> io::Result<()> {
    loop {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        if packets.send((header, body)).is_err() {
            return Ok(());
        }
    }
}

fn read_str(body: &[u8], at: usize) -> (String, usize) {
    let len = u16::from_be_bytes([body[at], body[at + 1]]) as usize;
    let text = String::from_utf8_lossy(&body[at + 2..at + 2 + len]).into_owned();
    (text, at + 2 + len)
}

/// Reply bytes for a client packet, and what to report to the test.
fn respond(header: u8, body: &[u8]) -> (Vec<u8>, Option<ReceivedPacket>) {
    match header >> 4 {
        1 => (vec![0x20, 0x02, 0x00, 0x00], Some(ReceivedPacket::Connect)),
        3 => {
            let qos = (header >> 1) & 0x03;
            let (topic, mut at) = read_str(body, 0);
            let mut reply = Vec::new();
            if qos > 0 {
                reply = vec![0x40, 0x02, body[at], body[at + 1]];
                at += 2;
            }
            let payload = body[at..].to_vec();
            (reply, Some(ReceivedPacket::Publish { topic, payload }))
        }
        8 => {
            let mut filters = Vec::new();
            let mut at = 2;
            while at < body.len() {
                let (filter, next) = read_str(body, at);
                filters.push(filter);
                at = next + 1;
            }
            let mut reply = vec![0x90, 2 + filters.len() as u8, body[0], body[1]];
            reply.extend(std::iter::repeat(0x01).take(filters.len()));
            (reply, Some(ReceivedPacket::Subscribe(filters)))
        }
        10 => (vec![0xb0, 0x02, body[0], body[1]], None),
        12 => (vec![0xd0, 0x00], None),
        14 => (Vec::new(), Some(ReceivedPacket::Disconnect)),
        _ => (Vec::new(), None),
    }
}

fn encode_publish(topic: &str, payload: &[u8], retain: bool) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);

    let mut packet = vec![0x30 | u8::from(retain)];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend(body);
    packet
}

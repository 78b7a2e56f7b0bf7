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

//! Processing of inbound broker messages.
//!
//! Per message, in order: drop retained replays, classify the topic, then
//! either fan out a status update or resolve (auto-registering if needed)
//! the owning device, append the payload to its history and fan it out.
//! Persistence always precedes fan-out.

use std::sync::Arc;

use log::{debug, error, info, warn};
use rumqttc::Publish;

use devhub_store::{Device, DeviceDirectory, NewDevice, NewTelemetry, StoreError, TelemetryStore};

use crate::classifier::{classify, MessageClass};
use crate::sink::{EventSink, LiveEvent};

/// How many times a lost auto-registration race is re-resolved.
const REGISTRATION_ATTEMPTS: usize = 3;

/// An inbound application message, decoupled from the MQTT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    /// Decoded as UTF-8 (lossy); otherwise opaque.
    pub payload: String,
    pub retained: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, retained: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained,
        }
    }
}

impl From<&Publish> for InboundMessage {
    fn from(publish: &Publish) -> Self {
        Self {
            topic: publish.topic.clone(),
            payload: String::from_utf8_lossy(&publish.payload).into_owned(),
            retained: publish.retain,
        }
    }
}

/// What happened to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Retained replay, ignored.
    Retained,
    StatusForwarded { base_topic: String },
    Stored { device_id: String, auto_registered: bool },
    /// Persistence failed; the message was logged and dropped.
    Dropped,
}

pub struct Ingestor {
    id: String,
    directory: Arc<dyn DeviceDirectory>,
    telemetry: Arc<dyn TelemetryStore>,
    sink: Arc<dyn EventSink>,
}

impl Ingestor {
    pub fn new(
        id: impl Into<String>,
        directory: Arc<dyn DeviceDirectory>,
        telemetry: Arc<dyn TelemetryStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            id: id.into(),
            directory,
            telemetry,
            sink,
        }
    }

    /// Process one message. Never fails: store errors drop the message.
    ///
    /// Safe to call concurrently; duplicate auto-registration is prevented
    /// by the directory's unique topic constraint.
    pub async fn handle(&self, message: InboundMessage) -> IngestOutcome {
        let source_id = &self.id;
        if message.retained {
            debug!("[{source_id}] Ignored retained message on {}", message.topic);
            return IngestOutcome::Retained;
        }

        match classify(&message.topic) {
            MessageClass::Status { base_topic } => {
                debug!(
                    "[{source_id}] Status on {} for {base_topic}: {}",
                    message.topic, message.payload
                );
                self.sink.emit(LiveEvent::DeviceStatusUpdated {
                    topic: base_topic.clone(),
                    payload: message.payload,
                });
                IngestOutcome::StatusForwarded { base_topic }
            }
            MessageClass::Telemetry => {
                match self.store_telemetry(&message.topic, &message.payload).await {
                    Ok((device_id, auto_registered)) => {
                        self.sink.emit(LiveEvent::TelemetryReceived {
                            topic: message.topic,
                            payload: message.payload,
                        });
                        IngestOutcome::Stored {
                            device_id,
                            auto_registered,
                        }
                    }
                    Err(e) => {
                        error!(
                            "[{source_id}] Dropped telemetry on {}: {e}",
                            message.topic
                        );
                        IngestOutcome::Dropped
                    }
                }
            }
        }
    }

    async fn store_telemetry(&self, topic: &str, payload: &str) -> Result<(String, bool), StoreError> {
        let (device, auto_registered) = self.resolve_device(topic).await?;
        self.telemetry
            .append(NewTelemetry::now(device.id.clone(), payload))
            .await?;
        Ok((device.id, auto_registered))
    }

    /// Find the device owning `topic`, registering one if there is none.
    async fn resolve_device(&self, topic: &str) -> Result<(Device, bool), StoreError> {
        let source_id = &self.id;
        let mut last_conflict = None;
        for _ in 0..REGISTRATION_ATTEMPTS {
            if let Some(device) = self.directory.lookup_by_topic(topic).await? {
                return Ok((device, false));
            }
            match self.directory.create(NewDevice::auto_registered(topic)).await {
                Ok(device) => {
                    info!("[{source_id}] New device detected: {topic} (id {})", device.id);
                    return Ok((device, true));
                }
                Err(StoreError::TopicConflict(t)) => {
                    warn!("[{source_id}] Lost registration race for {t}, re-reading");
                    last_conflict = Some(t);
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::TopicConflict(
            last_conflict.unwrap_or_else(|| topic.to_string()),
        ))
    }
}

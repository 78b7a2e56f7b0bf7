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

//! Fan-out of live updates to dashboard listeners.
//!
//! The ingestion core only knows the [`EventSink`] trait. Whatever pushes
//! events to browsers subscribes to a [`BroadcastSink`] and forwards them.

use log::{debug, info};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default number of events buffered for slow listeners.
pub const DEFAULT_SINK_CAPACITY: usize = 1000;

/// Event pushed to every connected listener, unfiltered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum LiveEvent {
    TelemetryReceived { topic: String, payload: String },
    /// `topic` is the device's telemetry topic, not the status topic.
    DeviceStatusUpdated { topic: String, payload: String },
}

impl LiveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::TelemetryReceived { .. } => "TelemetryReceived",
            LiveEvent::DeviceStatusUpdated { .. } => "DeviceStatusUpdated",
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            LiveEvent::TelemetryReceived { topic, .. }
            | LiveEvent::DeviceStatusUpdated { topic, .. } => topic,
        }
    }
}

/// Receives fan-out events. `emit` must not block: a slow or absent
/// listener can never stall ingestion.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LiveEvent);
}

/// Broadcast-channel sink. Listeners that fall behind lose the oldest
/// events instead of applying back-pressure.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LiveEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SINK_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: LiveEvent) {
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            debug!("No live listeners for {} on {}", event.name(), event.topic());
        }
    }
}

/// Sink that only writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: LiveEvent) {
        match &event {
            LiveEvent::TelemetryReceived { topic, payload }
            | LiveEvent::DeviceStatusUpdated { topic, payload } => {
                info!("[live] {} topic={topic} payload={payload}", event.name());
            }
        }
    }
}

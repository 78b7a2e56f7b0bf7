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

//! MQTT ingestion core for devhub.
//!
//! Holds a long-lived broker connection, restores subscriptions for every
//! known device on each (re)connect, classifies inbound messages by topic,
//! auto-registers unseen devices, persists telemetry and fans out live
//! updates through an [`EventSink`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use devhub_source_mqtt::{BroadcastSink, MqttSource, MqttSourceConfig};
//! use devhub_store::SledStore;
//!
//! let store = Arc::new(SledStore::open("devhub_db")?);
//! let sink = Arc::new(BroadcastSink::new());
//! let config = MqttSourceConfig::builder("ingest", "broker.local")
//!     .port(1883)
//!     .build();
//!
//! let source = MqttSource::new(config, store.clone(), store, sink.clone());
//! source.start().await?;
//! ```

pub mod broker;
pub mod classifier;
pub mod config;
pub mod devices;
pub mod ingest;
pub mod lifecycle;
pub mod sink;
pub mod source;
pub mod subscriptions;

#[cfg(test)]
mod testing;

pub use broker::{BrokerClient, BrokerError, ClientHandle};
pub use classifier::{classify, MessageClass, STATUS_FILTER};
pub use config::{MqttSourceConfig, MqttSourceConfigBuilder};
pub use devices::{DeviceService, DeviceSnapshot, ServiceError};
pub use ingest::{InboundMessage, IngestOutcome, Ingestor};
pub use lifecycle::{ConnectionEvent, ConnectionLifecycle, ConnectionState};
pub use rumqttc::QoS;
pub use sink::{BroadcastSink, EventSink, LiveEvent, LogSink};
pub use source::MqttSource;
pub use subscriptions::{RestoreError, SubscriptionManager};

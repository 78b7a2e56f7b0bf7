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

//! Configuration types for the MQTT ingestion source.

use std::time::Duration;

use serde::Deserialize;

use crate::classifier::STATUS_FILTER;

/// Configuration for the MQTT source.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttSourceConfig {
    /// Component identifier, used as the log prefix.
    pub id: String,
    /// MQTT broker hostname or IP.
    pub broker_host: String,
    /// MQTT broker port (default: 1883).
    pub port: u16,
    /// MQTT client ID. Defaults to `"devhub-source-{id}"`.
    pub client_id: String,
    /// Optional MQTT username for authentication.
    pub username: Option<String>,
    /// Optional MQTT password for authentication.
    pub password: Option<String>,
    /// Connect over TLS using the platform root certificates.
    pub use_tls: bool,
    /// MQTT keep-alive interval (default: 30s).
    pub keep_alive: Duration,
    /// Fixed delay between reconnect attempts (default: 5s).
    pub reconnect_delay: Duration,
    /// Wildcard filter carrying device presence (default: `iot/device/+/status`).
    pub status_filter: String,
    /// Capacity of the queue between the broker event loop and the
    /// ingestion worker, and of the client request channel (default: 100).
    pub inbound_capacity: usize,
}

impl MqttSourceConfig {
    /// Start building a new config with the required fields.
    pub fn builder(id: impl Into<String>, broker_host: impl Into<String>) -> MqttSourceConfigBuilder {
        let id = id.into();
        MqttSourceConfigBuilder {
            client_id: format!("devhub-source-{id}"),
            id,
            broker_host: broker_host.into(),
            port: 1883,
            username: None,
            password: None,
            use_tls: false,
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            status_filter: STATUS_FILTER.to_string(),
            inbound_capacity: 100,
        }
    }
}

/// Builder for [`MqttSourceConfig`].
pub struct MqttSourceConfigBuilder {
    id: String,
    broker_host: String,
    port: u16,
    client_id: String,
    username: Option<String>,
    password: Option<String>,
    use_tls: bool,
    keep_alive: Duration,
    reconnect_delay: Duration,
    status_filter: String,
    inbound_capacity: usize,
}

impl MqttSourceConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn status_filter(mut self, filter: impl Into<String>) -> Self {
        self.status_filter = filter.into();
        self
    }

    /// Zero is bumped to one; both channels need room for a single item.
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    /// Build the config.
    pub fn build(self) -> MqttSourceConfig {
        MqttSourceConfig {
            id: self.id,
            broker_host: self.broker_host,
            port: self.port,
            client_id: self.client_id,
            username: self.username,
            password: self.password,
            use_tls: self.use_tls,
            keep_alive: self.keep_alive,
            reconnect_delay: self.reconnect_delay,
            status_filter: self.status_filter,
            inbound_capacity: self.inbound_capacity,
        }
    }
}

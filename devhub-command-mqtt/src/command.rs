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

//! Dashboard-issued control commands.

use std::sync::Arc;

use log::{error, info};
use serde::Serialize;
use thiserror::Error;

use devhub_source_mqtt::{BrokerClient, BrokerError, QoS};

use crate::publisher;

#[derive(Debug, Error)]
pub enum CommandError {
    /// Rejected before any broker interaction.
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to send command: {0}")]
    Transport(#[from] BrokerError),
}

/// Where a command went and what was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReceipt {
    pub topic: String,
    pub payload: String,
}

/// Publishes control commands through the shared broker connection.
pub struct CommandPublisher {
    id: String,
    broker: Arc<dyn BrokerClient>,
}

impl CommandPublisher {
    pub fn new(id: impl Into<String>, broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            id: id.into(),
            broker,
        }
    }

    /// Publish `{"command": command}` on the control topic derived from
    /// `topic`, at least once and not retained.
    pub async fn send(&self, topic: &str, command: &str) -> Result<CommandReceipt, CommandError> {
        if topic.is_empty() || command.is_empty() {
            return Err(CommandError::InvalidRequest("topic and command are required"));
        }

        let topic = publisher::control_topic(topic);
        let payload = publisher::command_payload(command)?;
        self.publish(&topic, &payload, false, QoS::AtLeastOnce).await?;

        info!("[{}] Sent command to {topic}: {payload}", self.id);
        Ok(CommandReceipt { topic, payload })
    }

    /// Publish an arbitrary payload.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &str,
        retain: bool,
        qos: QoS,
    ) -> Result<(), BrokerError> {
        self.broker
            .publish(topic, payload.as_bytes().to_vec(), retain, qos)
            .await
            .inspect_err(|e| error!("[{}] Failed to publish to {topic}: {e}", self.id))
    }
}

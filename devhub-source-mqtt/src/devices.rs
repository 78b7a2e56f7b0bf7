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

//! Device operations behind the dashboard's HTTP endpoints.

use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use devhub_store::{Device, DeviceDirectory, NewDevice, StoreError, Telemetry, TelemetryStore};

use crate::broker::BrokerError;
use crate::classifier::device_telemetry_topic;
use crate::subscriptions::SubscriptionManager;

/// Shown for devices that have not reported anything yet.
pub const NO_DATA: &str = "N/A";

/// History length used for dashboard charts.
pub const DEFAULT_HISTORY_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// A device and its latest payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub topic: String,
    pub name: String,
    pub last_message: String,
}

pub struct DeviceService {
    directory: Arc<dyn DeviceDirectory>,
    telemetry: Arc<dyn TelemetryStore>,
    subscriptions: Arc<SubscriptionManager>,
}

impl DeviceService {
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        telemetry: Arc<dyn TelemetryStore>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Self {
        Self {
            directory,
            telemetry,
            subscriptions,
        }
    }

    /// Register a device, give it `iot/device/{id}/telemetry` and subscribe.
    pub async fn create_device(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<Device, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("device name is required"));
        }

        let device = self
            .directory
            .create(NewDevice::named(name, description))
            .await?;
        let topic = device_telemetry_topic(&device.id);
        let device = match self.directory.set_topic(&device.id, &topic).await {
            Ok(device) => device,
            Err(e) => {
                if let Err(cleanup) = self.directory.delete(&device.id).await {
                    warn!("Could not remove half-created device {}: {cleanup}", device.id);
                }
                return Err(e.into());
            }
        };

        self.subscriptions.subscribe(&topic).await?;
        info!("Created device '{}' on {topic}", device.name);
        Ok(device)
    }

    /// Unsubscribe from `name` and delete the device called `name`.
    ///
    /// Dashboards identify devices by topic here, which is also the name of
    /// every auto-registered device. Directory failures are logged only.
    /// Returns whether a device was deleted.
    pub async fn remove_device(&self, name: &str) -> Result<bool, ServiceError> {
        if name.is_empty() {
            return Ok(false);
        }
        self.subscriptions.unsubscribe(name).await?;

        let device = match self.directory.lookup_by_name(name).await {
            Ok(Some(device)) => device,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!("Could not look up device '{name}' for removal: {e}");
                return Ok(false);
            }
        };
        if let Err(e) = self.directory.delete(&device.id).await {
            warn!("Could not delete device '{name}': {e}");
            return Ok(false);
        }
        info!("Removed device '{name}'");
        Ok(true)
    }

    pub async fn device(&self, id: &str) -> Result<Device, ServiceError> {
        self.directory
            .lookup_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("device '{id}'")))
    }

    /// Every device with its most recent payload.
    pub async fn latest_messages(&self) -> Result<Vec<DeviceSnapshot>, ServiceError> {
        let mut snapshots = Vec::new();
        for device in self.directory.list().await? {
            snapshots.push(self.snapshot(device).await?);
        }
        Ok(snapshots)
    }

    pub async fn latest_message(&self, topic: &str) -> Result<DeviceSnapshot, ServiceError> {
        let device = self.by_topic(topic).await?;
        self.snapshot(device).await
    }

    /// The last `n` payloads of the device on `topic`, oldest first.
    pub async fn telemetry_history(
        &self,
        topic: &str,
        n: usize,
    ) -> Result<Vec<Telemetry>, ServiceError> {
        if topic.is_empty() {
            return Err(ServiceError::InvalidRequest("topic parameter is required"));
        }
        let device = self.by_topic(topic).await?;
        Ok(self.telemetry.most_recent_n(&device.id, n).await?)
    }

    async fn by_topic(&self, topic: &str) -> Result<Device, ServiceError> {
        self.directory
            .lookup_by_topic(topic)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("topic '{topic}'")))
    }

    async fn snapshot(&self, device: Device) -> Result<DeviceSnapshot, ServiceError> {
        let last_message = self
            .telemetry
            .most_recent(&device.id)
            .await?
            .map(|t| t.payload)
            .unwrap_or_else(|| NO_DATA.to_string());
        Ok(DeviceSnapshot {
            topic: device.topic,
            name: device.name,
            last_message,
        })
    }
}

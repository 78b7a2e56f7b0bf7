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

//! Storage interfaces consumed by the ingestion core and the device service.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Device, NewDevice, NewTelemetry, Telemetry};

/// Durable mapping from topic to device.
///
/// `create` and `set_topic` enforce topic uniqueness and fail with
/// [`StoreError::TopicConflict`](crate::StoreError::TopicConflict) when the
/// topic already belongs to another device. Callers that race to register
/// the same topic rely on this to end up with a single device.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn lookup_by_topic(&self, topic: &str) -> Result<Option<Device>>;

    async fn lookup_by_id(&self, id: &str) -> Result<Option<Device>>;

    async fn lookup_by_name(&self, name: &str) -> Result<Option<Device>>;

    async fn list(&self) -> Result<Vec<Device>>;

    async fn create(&self, device: NewDevice) -> Result<Device>;

    /// Assign the topic of an existing device.
    async fn set_topic(&self, id: &str, topic: &str) -> Result<Device>;

    /// Every non-empty topic currently owned by a device.
    async fn all_topics(&self) -> Result<Vec<String>>;

    /// Remove a device. Deleting an unknown id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Append-only telemetry history.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn append(&self, telemetry: NewTelemetry) -> Result<Telemetry>;

    async fn most_recent(&self, device_id: &str) -> Result<Option<Telemetry>>;

    /// The newest `n` records for a device, returned oldest first.
    async fn most_recent_n(&self, device_id: &str, n: usize) -> Result<Vec<Telemetry>>;
}

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

//! In-memory implementation of both stores.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::model::{Device, NewDevice, NewTelemetry, Telemetry};
use crate::traits::{DeviceDirectory, TelemetryStore};

#[derive(Debug, Default)]
struct Inner {
    devices: Vec<Device>,
    /// Per device, sorted by timestamp ascending.
    telemetry: HashMap<String, Vec<Telemetry>>,
}

/// Volatile store. The whole state sits behind one mutex that is never held
/// across an await point.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DeviceDirectory for MemoryStore {
    async fn lookup_by_topic(&self, topic: &str) -> Result<Option<Device>> {
        Ok(self
            .lock()
            .devices
            .iter()
            .find(|d| !d.topic.is_empty() && d.topic == topic)
            .cloned())
    }

    async fn lookup_by_id(&self, id: &str) -> Result<Option<Device>> {
        Ok(self.lock().devices.iter().find(|d| d.id == id).cloned())
    }

    async fn lookup_by_name(&self, name: &str) -> Result<Option<Device>> {
        Ok(self.lock().devices.iter().find(|d| d.name == name).cloned())
    }

    async fn list(&self) -> Result<Vec<Device>> {
        Ok(self.lock().devices.clone())
    }

    async fn create(&self, device: NewDevice) -> Result<Device> {
        let mut inner = self.lock();
        if !device.topic.is_empty() && inner.devices.iter().any(|d| d.topic == device.topic) {
            return Err(StoreError::TopicConflict(device.topic));
        }

        let device = Device {
            id: Uuid::new_v4().simple().to_string(),
            name: device.name,
            topic: device.topic,
            description: device.description,
            created_at: Utc::now(),
        };
        inner.devices.push(device.clone());
        Ok(device)
    }

    async fn set_topic(&self, id: &str, topic: &str) -> Result<Device> {
        let mut inner = self.lock();
        if !topic.is_empty() && inner.devices.iter().any(|d| d.topic == topic && d.id != id) {
            return Err(StoreError::TopicConflict(topic.to_string()));
        }
        let device = inner
            .devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        device.topic = topic.to_string();
        Ok(device.clone())
    }

    async fn all_topics(&self) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .devices
            .iter()
            .filter(|d| !d.topic.is_empty())
            .map(|d| d.topic.clone())
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.lock().devices.retain(|d| d.id != id);
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn append(&self, telemetry: NewTelemetry) -> Result<Telemetry> {
        let record = Telemetry {
            id: Uuid::new_v4().simple().to_string(),
            payload: telemetry.payload,
            timestamp: telemetry.timestamp,
            device_id: telemetry.device_id,
        };

        let mut inner = self.lock();
        let history = inner.telemetry.entry(record.device_id.clone()).or_default();
        let at = history.partition_point(|t| t.timestamp <= record.timestamp);
        history.insert(at, record.clone());
        Ok(record)
    }

    async fn most_recent(&self, device_id: &str) -> Result<Option<Telemetry>> {
        Ok(self
            .lock()
            .telemetry
            .get(device_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn most_recent_n(&self, device_id: &str, n: usize) -> Result<Vec<Telemetry>> {
        let inner = self.lock();
        let Some(history) = inner.telemetry.get(device_id) else {
            return Ok(Vec::new());
        };
        let start = history.len().saturating_sub(n);
        Ok(history[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_topic_uniqueness() {
        let store = MemoryStore::new();
        store.create(NewDevice::auto_registered("x/telemetry")).await.unwrap();
        assert!(matches!(
            store.create(NewDevice::auto_registered("x/telemetry")).await,
            Err(StoreError::TopicConflict(_))
        ));

        // Devices awaiting a topic never collide with each other.
        store.create(NewDevice::named("a", None)).await.unwrap();
        store.create(NewDevice::named("b", None)).await.unwrap();
        assert_eq!(store.all_topics().await.unwrap(), vec!["x/telemetry".to_string()]);
    }

    #[tokio::test]
    async fn test_set_topic_conflict_and_missing() {
        let store = MemoryStore::new();
        store.create(NewDevice::auto_registered("x/telemetry")).await.unwrap();
        let other = store.create(NewDevice::named("other", None)).await.unwrap();

        assert!(matches!(
            store.set_topic(&other.id, "x/telemetry").await,
            Err(StoreError::TopicConflict(_))
        ));
        assert!(matches!(
            store.set_topic("missing", "y/telemetry").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_order_append_is_sorted() {
        let store = MemoryStore::new();
        let base = Utc::now();
        for (offset, payload) in [(5, "late"), (1, "early"), (3, "middle")] {
            store
                .append(NewTelemetry {
                    device_id: "d".into(),
                    payload: payload.into(),
                    timestamp: base + Duration::seconds(offset),
                })
                .await
                .unwrap();
        }

        let history: Vec<_> = store
            .most_recent_n("d", 2)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.payload)
            .collect();
        assert_eq!(history, vec!["middle", "late"]);
        assert_eq!(store.most_recent("d").await.unwrap().unwrap().payload, "late");
        assert!(store.most_recent_n("none", 5).await.unwrap().is_empty());
    }
}

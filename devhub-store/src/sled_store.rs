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

//! Persistence backed by `sled`.
//!
//! Three trees are kept in one database:
//! - `devices`: device id -> JSON-encoded [`Device`]
//! - `device_topics`: topic -> device id, the unique index on topics
//! - `telemetry`: `{device_id}/{timestamp_micros}{sequence}` -> JSON-encoded
//!   [`Telemetry`]. Timestamp and sequence are big-endian so a prefix scan
//!   yields a device's history in chronological order.

use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use sled::{Db, Tree};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::model::{Device, NewDevice, NewTelemetry, Telemetry};
use crate::traits::{DeviceDirectory, TelemetryStore};

const DEVICES_TREE: &str = "devices";
const TOPICS_TREE: &str = "device_topics";
const TELEMETRY_TREE: &str = "telemetry";

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    devices: Tree,
    topics: Tree,
    telemetry: Tree,
}

impl SledStore {
    /// Open or create a database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// A database that lives only as long as this handle. Used by tests.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            devices: db.open_tree(DEVICES_TREE)?,
            topics: db.open_tree(TOPICS_TREE)?,
            telemetry: db.open_tree(TELEMETRY_TREE)?,
            db,
        })
    }

    /// Wait until every write so far is durable on disk.
    pub async fn flush(&self) -> Result<usize> {
        Ok(self.db.flush_async().await?)
    }

    fn get_device(&self, id: &str) -> Result<Option<Device>> {
        match self.devices.get(id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn put_device(&self, device: &Device) -> Result<()> {
        self.devices
            .insert(device.id.as_bytes(), serde_json::to_vec(device)?)?;
        Ok(())
    }

    /// Point `topic` at `id` unless another device already owns it.
    fn claim_topic(&self, topic: &str, id: &str) -> Result<()> {
        let claimed = self
            .topics
            .compare_and_swap(topic.as_bytes(), None::<&[u8]>, Some(id.as_bytes()))?;
        match claimed {
            Ok(()) => Ok(()),
            Err(existing) if existing.current.as_deref() == Some(id.as_bytes()) => Ok(()),
            Err(_) => Err(StoreError::TopicConflict(topic.to_string())),
        }
    }

    /// Drop the index entry for `topic` only if it still points at `id`.
    fn release_topic(&self, topic: &str, id: &str) -> Result<()> {
        if topic.is_empty() {
            return Ok(());
        }
        // A failed swap means the topic already moved on; nothing to release.
        let _ = self
            .topics
            .compare_and_swap(topic.as_bytes(), Some(id.as_bytes()), None::<&[u8]>)?;
        Ok(())
    }

    fn telemetry_prefix(device_id: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(device_id.len() + 1);
        prefix.extend_from_slice(device_id.as_bytes());
        prefix.push(b'/');
        prefix
    }

    fn decode_history<I>(&self, rows: I) -> Result<Vec<Telemetry>>
    where
        I: Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>,
    {
        rows.map(|row| -> Result<Telemetry> {
            let (_, raw) = row?;
            Ok(serde_json::from_slice(&raw)?)
        })
        .collect()
    }
}

#[async_trait]
impl DeviceDirectory for SledStore {
    async fn lookup_by_topic(&self, topic: &str) -> Result<Option<Device>> {
        let Some(id) = self.topics.get(topic.as_bytes())? else {
            return Ok(None);
        };
        let id = String::from_utf8_lossy(&id);
        self.get_device(&id)
    }

    async fn lookup_by_id(&self, id: &str) -> Result<Option<Device>> {
        self.get_device(id)
    }

    async fn lookup_by_name(&self, name: &str) -> Result<Option<Device>> {
        Ok(self.list().await?.into_iter().find(|d| d.name == name))
    }

    async fn list(&self) -> Result<Vec<Device>> {
        self.devices
            .iter()
            .values()
            .map(|raw| -> Result<Device> { Ok(serde_json::from_slice(&raw?)?) })
            .collect()
    }

    async fn create(&self, device: NewDevice) -> Result<Device> {
        let device = Device {
            id: Uuid::new_v4().simple().to_string(),
            name: device.name,
            topic: device.topic,
            description: device.description,
            created_at: Utc::now(),
        };

        // The record goes in before the index entry so that anyone who can
        // see the topic can also read the device behind it.
        self.put_device(&device)?;
        if !device.topic.is_empty() {
            if let Err(e) = self.claim_topic(&device.topic, &device.id) {
                self.devices.remove(device.id.as_bytes())?;
                return Err(e);
            }
        }
        Ok(device)
    }

    async fn set_topic(&self, id: &str, topic: &str) -> Result<Device> {
        let mut device = self
            .get_device(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if device.topic == topic {
            return Ok(device);
        }

        if !topic.is_empty() {
            self.claim_topic(topic, id)?;
        }
        let previous = std::mem::replace(&mut device.topic, topic.to_string());
        self.put_device(&device)?;
        self.release_topic(&previous, id)?;
        Ok(device)
    }

    async fn all_topics(&self) -> Result<Vec<String>> {
        self.topics
            .iter()
            .keys()
            .map(|key| -> Result<String> { Ok(String::from_utf8_lossy(&key?).into_owned()) })
            .collect()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let Some(device) = self.get_device(id)? else {
            warn!("Delete requested for unknown device {id}");
            return Ok(());
        };
        self.release_topic(&device.topic, id)?;
        self.devices.remove(id.as_bytes())?;
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for SledStore {
    async fn append(&self, telemetry: NewTelemetry) -> Result<Telemetry> {
        let record = Telemetry {
            id: Uuid::new_v4().simple().to_string(),
            payload: telemetry.payload,
            timestamp: telemetry.timestamp,
            device_id: telemetry.device_id,
        };

        let micros = record.timestamp.timestamp_micros().max(0) as u64;
        let mut key = Self::telemetry_prefix(&record.device_id);
        key.extend_from_slice(&micros.to_be_bytes());
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());

        self.telemetry.insert(key, serde_json::to_vec(&record)?)?;
        Ok(record)
    }

    async fn most_recent(&self, device_id: &str) -> Result<Option<Telemetry>> {
        let prefix = Self::telemetry_prefix(device_id);
        match self.telemetry.scan_prefix(prefix).next_back() {
            Some(row) => {
                let (_, raw) = row?;
                Ok(Some(serde_json::from_slice(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn most_recent_n(&self, device_id: &str, n: usize) -> Result<Vec<Telemetry>> {
        let prefix = Self::telemetry_prefix(device_id);
        let mut newest_first =
            self.decode_history(self.telemetry.scan_prefix(prefix).rev().take(n))?;
        newest_first.reverse();
        Ok(newest_first)
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .finish()
    }
}

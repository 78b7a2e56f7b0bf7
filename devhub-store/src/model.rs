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

//! Records persisted by the device directory and the telemetry store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Description given to devices created from unseen telemetry topics.
pub const AUTO_REGISTERED_DESCRIPTION: &str = "Auto-registered device";

/// A field device. The topic is unique across the directory and is the unit
/// of broker subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    /// Empty only between explicit creation and topic assignment.
    pub topic: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a device. The directory assigns the id and
/// creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDevice {
    pub name: String,
    pub topic: String,
    pub description: Option<String>,
}

impl NewDevice {
    /// A device discovered through telemetry on a topic nobody registered.
    pub fn auto_registered(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self {
            name: topic.clone(),
            topic,
            description: Some(AUTO_REGISTERED_DESCRIPTION.to_string()),
        }
    }

    /// A device created from the dashboard. Its topic is assigned once the
    /// directory has given it an id.
    pub fn named(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            topic: String::new(),
            description,
        }
    }
}

/// One stored telemetry payload. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telemetry {
    pub id: String,
    /// Raw payload as received; never parsed by the store.
    pub payload: String,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTelemetry {
    pub device_id: String,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

impl NewTelemetry {
    /// Telemetry stamped with the current time.
    pub fn now(device_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }
}

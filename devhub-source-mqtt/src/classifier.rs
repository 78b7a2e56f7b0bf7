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

//! Topic conventions and classification of inbound topics.
//!
//! Device telemetry is published on `iot/device/{id}/telemetry` and presence
//! on `iot/device/{id}/status`. A status topic maps back to the telemetry
//! topic of the same device so that dashboards can key both by one string.

/// Wildcard filter covering every device status topic.
pub const STATUS_FILTER: &str = "iot/device/+/status";

const STATUS_SUFFIX: &str = "/status";
const TELEMETRY_SUFFIX: &str = "/telemetry";

/// What an inbound message carries, derived from its topic alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageClass {
    /// Ephemeral presence information for the device whose telemetry is
    /// published on `base_topic`.
    Status { base_topic: String },
    Telemetry,
}

/// Classify a topic. Total: anything that is not a `/status` topic is
/// telemetry, including topics without separators.
pub fn classify(topic: &str) -> MessageClass {
    match topic.strip_suffix(STATUS_SUFFIX) {
        Some(device) => MessageClass::Status {
            base_topic: format!("{device}{TELEMETRY_SUFFIX}"),
        },
        None => MessageClass::Telemetry,
    }
}

/// Telemetry topic assigned to an explicitly created device.
pub fn device_telemetry_topic(device_id: &str) -> String {
    format!("iot/device/{device_id}{TELEMETRY_SUFFIX}")
}

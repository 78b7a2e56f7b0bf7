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

//! Control command publishing for devhub.
//!
//! Turns a dashboard intent `(topic, command)` into a publish of
//! `{"command": "..."}` on the device's `/control` topic.
//!
//! # Example
//!
//! ```ignore
//! use devhub_command_mqtt::CommandPublisher;
//!
//! let publisher = CommandPublisher::new("commands", source.broker());
//! let receipt = publisher.send("iot/device/42/telemetry", "LED_ON").await?;
//! assert_eq!(receipt.topic, "iot/device/42/telemetry/control");
//! ```

pub mod command;
pub mod publisher;

pub use command::{CommandError, CommandPublisher, CommandReceipt};

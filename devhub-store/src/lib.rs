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

//! Durable state for devhub: the device directory and telemetry history.
//!
//! Both stores are exposed as traits so that the ingestion core can run
//! against the embedded [`SledStore`] in production and [`MemoryStore`] in
//! tests.
//!
//! # Example
//!
//! ```ignore
//! use devhub_store::{DeviceDirectory, NewDevice, SledStore};
//!
//! let store = SledStore::open("devhub_db")?;
//! let device = store.create(NewDevice::auto_registered("sensors/kitchen")).await?;
//! assert_eq!(device.name, "sensors/kitchen");
//! ```

pub mod error;
pub mod memory;
pub mod model;
pub mod sled_store;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use model::{Device, NewDevice, NewTelemetry, Telemetry, AUTO_REGISTERED_DESCRIPTION};
pub use sled_store::SledStore;
pub use traits::{DeviceDirectory, TelemetryStore};

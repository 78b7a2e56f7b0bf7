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

//! Error type shared by all store implementations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another device already owns the topic.
    #[error("topic '{0}' is already owned by another device")]
    TopicConflict(String),

    #[error("device '{0}' not found")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Sled(#[from] sled::Error),

    #[error("failed to encode or decode record: {0}")]
    Codec(#[from] serde_json::Error),
}
